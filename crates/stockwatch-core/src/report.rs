//! CSV exports of check results and the status history.
//!
//! Every export starts with a UTF-8 byte-order mark so spreadsheet tools pick
//! the right encoding for the Korean labels. Data fields are always quoted,
//! with embedded quotes doubled. Timestamps are rendered in the caller's time
//! zone at minute resolution.

use std::fmt::Display;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::product::{EntityStatus, ProductRecord, ResultBuckets, StatusKind};

const BOM: char = '\u{feff}';

pub const CHECK_REPORT_HEADER: [&str; 5] = ["모델ID", "상품명", "URL", "상태", "확인시간"];

pub const HISTORY_REPORT_HEADER: [&str; 6] =
  ["모델ID", "상품명", "현재상태", "가격", "URL", "상태변경기록"];

pub const REMOVED_REPORT_HEADER: [&str; 7] =
  ["모델ID", "상품명", "카테고리", "가격", "삭제 감지일", "마지막 상태", "URL"];

// ─── Labels ──────────────────────────────────────────────────────────────────

pub fn status_kind_label(kind: StatusKind) -> &'static str {
  match kind {
    StatusKind::OutOfStock => "품절",
    StatusKind::InStock => "재고 있음",
    StatusKind::Removed => "삭제됨",
    StatusKind::Error => "오류",
  }
}

pub fn entity_status_label(status: EntityStatus) -> &'static str {
  match status {
    EntityStatus::Active => "정상 판매",
    EntityStatus::OutOfStock => "품절",
    EntityStatus::Removed => "삭제됨",
    EntityStatus::Unknown => "알 수 없음",
  }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// One row per check result, in bucket order: out of stock, in stock,
/// removed, error.
pub fn check_report<Tz>(results: &ResultBuckets, tz: &Tz) -> String
where
  Tz: TimeZone,
  Tz::Offset: Display,
{
  let mut out = header(&CHECK_REPORT_HEADER);
  for r in results.iter() {
    push_row(&mut out, &[
      r.model.as_deref().unwrap_or_default(),
      r.product_name.as_deref().unwrap_or_default(),
      r.url.as_str(),
      status_kind_label(r.status),
      format_minute(r.checked_at, tz).as_str(),
    ]);
  }
  out
}

/// One row per record with its transitions rendered as
/// `YYYY-MM-DD HH:MM: from → to`, joined by ` | `.
pub fn history_report<Tz>(records: &[ProductRecord], tz: &Tz) -> String
where
  Tz: TimeZone,
  Tz::Offset: Display,
{
  let mut out = header(&HISTORY_REPORT_HEADER);
  for record in records {
    let transitions = record
      .status_history
      .iter()
      .map(|t| {
        format!(
          "{}: {} → {}",
          format_minute(t.timestamp, tz),
          entity_status_label(t.from.unwrap_or_default()),
          entity_status_label(t.to),
        )
      })
      .collect::<Vec<_>>()
      .join(" | ");

    push_row(&mut out, &[
      record.model.as_deref().unwrap_or_default(),
      record.product_name.as_deref().unwrap_or_default(),
      entity_status_label(record.status),
      record.price().unwrap_or_default().as_str(),
      record.url.as_deref().unwrap_or_default(),
      transitions.as_str(),
    ]);
  }
  out
}

/// Removed products with the time the removal was detected and their last
/// transition in raw status codes.
pub fn removed_report<Tz>(records: &[ProductRecord], tz: &Tz) -> String
where
  Tz: TimeZone,
  Tz::Offset: Display,
{
  let mut out = header(&REMOVED_REPORT_HEADER);
  for record in records {
    let detected = record
      .status_history
      .last()
      .map(|t| t.timestamp)
      .or(record.last_checked)
      .map(|at| format_minute(at, tz))
      .unwrap_or_default();
    let last_status = record
      .status_history
      .last()
      .map(|t| {
        let from = t.from.as_ref().map(AsRef::<str>::as_ref).unwrap_or_default();
        format!("{from} → {}", t.to.as_ref())
      })
      .unwrap_or_default();
    let category = match record.extra.get("category") {
      Some(Value::String(s)) => s.clone(),
      _ => String::new(),
    };

    push_row(&mut out, &[
      record.model.as_deref().unwrap_or_default(),
      record.product_name.as_deref().unwrap_or_default(),
      category.as_str(),
      record.price().unwrap_or_default().as_str(),
      detected.as_str(),
      last_status.as_str(),
      record.url.as_deref().unwrap_or_default(),
    ]);
  }
  out
}

// ─── File names ──────────────────────────────────────────────────────────────

pub fn check_report_filename<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> String
where
  Tz::Offset: Display,
{
  format!("url_check_{}.csv", now.with_timezone(tz).format("%Y-%m-%d_%H%M"))
}

pub fn history_report_filename<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> String
where
  Tz::Offset: Display,
{
  format!("status_history_{}.csv", now.with_timezone(tz).format("%Y-%m-%d"))
}

pub fn removed_report_filename<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> String
where
  Tz::Offset: Display,
{
  format!("removed_products_{}.csv", now.with_timezone(tz).format("%Y-%m-%d"))
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn format_minute<Tz>(at: DateTime<Utc>, tz: &Tz) -> String
where
  Tz: TimeZone,
  Tz::Offset: Display,
{
  at.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string()
}

fn header(columns: &[&str]) -> String {
  let mut out = String::new();
  out.push(BOM);
  out.push_str(&columns.join(","));
  out.push('\n');
  out
}

fn push_row(out: &mut String, fields: &[&str]) {
  let quoted: Vec<String> = fields
    .iter()
    .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
    .collect();
  out.push_str(&quoted.join(","));
  out.push('\n');
}
