//! Product types: what the scraper hands us, what a check produces, and the
//! persisted history record.
//!
//! All types serialise with camelCase field names so the persisted JSON
//! matches the layout the scraper writes into the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, EnumString};

// ─── Statuses ────────────────────────────────────────────────────────────────

/// The outcome of one URL check.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr,
  EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum StatusKind {
  InStock,
  OutOfStock,
  Removed,
  Error,
}

/// The persisted lifecycle state of a tracked product.
///
/// Distinct from [`StatusKind`]: a check outcome of `error` says nothing about
/// the product, whereas `unknown` is a state a record can sit in.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  AsRefStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityStatus {
  Active,
  OutOfStock,
  Removed,
  #[default]
  Unknown,
}

impl StatusKind {
  /// The lifecycle state a check outcome implies, if any. An `error` outcome
  /// is not an observation of the product.
  pub fn observed_status(self) -> Option<EntityStatus> {
    match self {
      Self::InStock => Some(EntityStatus::Active),
      Self::OutOfStock => Some(EntityStatus::OutOfStock),
      Self::Removed => Some(EntityStatus::Removed),
      Self::Error => None,
    }
  }
}

// ─── Scraped attributes ──────────────────────────────────────────────────────

/// Field names owned by [`ProductRecord`]; never copied from attribute bags.
const RESERVED_FIELDS: [&str; 3] = ["status", "lastChecked", "statusHistory"];

/// The attribute bag the scraper produces for a product. Only the identity
/// fields are typed; price, category, image URLs etc. ride along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAttributes {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url:          Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub product_name: Option<String>,
  #[serde(flatten)]
  pub extra:        Map<String, Value>,
}

impl ProductAttributes {
  pub fn from_url(url: impl Into<String>) -> Self {
    Self { url: Some(url.into()), ..Self::default() }
  }

  /// The storage key for this product: the URL, falling back to the model.
  pub fn key(&self) -> Option<&str> {
    non_empty(self.url.as_deref()).or_else(|| non_empty(self.model.as_deref()))
  }
}

/// A product as stored in the `products` catalog collection.
pub type CatalogProduct = ProductAttributes;

fn non_empty(s: Option<&str>) -> Option<&str> { s.filter(|s| !s.is_empty()) }

// ─── Tracked URLs and check results ──────────────────────────────────────────

/// Which stored collection a URL was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
  Product,
  OutOfStock,
  History,
}

/// A URL queued for checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedUrl {
  pub url:          String,
  pub model:        Option<String>,
  pub product_name: Option<String>,
  pub source_type:  SourceType,
}

impl TrackedUrl {
  pub fn attributes(&self) -> ProductAttributes {
    ProductAttributes {
      url:          Some(self.url.clone()),
      model:        self.model.clone(),
      product_name: self.product_name.clone(),
      extra:        Map::new(),
    }
  }
}

/// The terminal outcome of checking one URL (after retries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
  pub url:           String,
  pub model:         Option<String>,
  pub product_name:  Option<String>,
  pub source_type:   SourceType,
  pub checked_at:    DateTime<Utc>,
  pub status:        StatusKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
}

/// Per-kind counts, as carried by progress events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultCounts {
  pub out_of_stock: usize,
  pub in_stock:     usize,
  pub error:        usize,
  pub removed:      usize,
}

impl ResultCounts {
  pub fn total(&self) -> usize {
    self.out_of_stock + self.in_stock + self.error + self.removed
  }
}

/// Check results bucketed by [`StatusKind`], each in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBuckets {
  pub out_of_stock: Vec<CheckResult>,
  pub in_stock:     Vec<CheckResult>,
  pub error:        Vec<CheckResult>,
  pub removed:      Vec<CheckResult>,
}

impl ResultBuckets {
  pub fn bucket(&self, kind: StatusKind) -> &[CheckResult] {
    match kind {
      StatusKind::OutOfStock => &self.out_of_stock,
      StatusKind::InStock => &self.in_stock,
      StatusKind::Error => &self.error,
      StatusKind::Removed => &self.removed,
    }
  }

  pub fn push(&mut self, result: CheckResult) {
    let bucket = match result.status {
      StatusKind::OutOfStock => &mut self.out_of_stock,
      StatusKind::InStock => &mut self.in_stock,
      StatusKind::Error => &mut self.error,
      StatusKind::Removed => &mut self.removed,
    };
    bucket.push(result);
  }

  pub fn counts(&self) -> ResultCounts {
    ResultCounts {
      out_of_stock: self.out_of_stock.len(),
      in_stock:     self.in_stock.len(),
      error:        self.error.len(),
      removed:      self.removed.len(),
    }
  }

  pub fn len(&self) -> usize { self.counts().total() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Every result, grouped in report order: out of stock, in stock, removed,
  /// error.
  pub fn iter(&self) -> impl Iterator<Item = &CheckResult> {
    self
      .out_of_stock
      .iter()
      .chain(&self.in_stock)
      .chain(&self.removed)
      .chain(&self.error)
  }
}

// ─── Out-of-stock collection ─────────────────────────────────────────────────

/// A lightweight entry in the `outOfStockProducts` collection, logically
/// keyed by `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfStockEntry {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url:             Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model:           Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub product_name:    Option<String>,
  #[serde(default)]
  pub is_out_of_stock: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timestamp:       Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra:           Map<String, Value>,
}

impl OutOfStockEntry {
  pub fn attributes(&self) -> ProductAttributes {
    ProductAttributes {
      url:          self.url.clone(),
      model:        self.model.clone(),
      product_name: self.product_name.clone(),
      extra:        strip_reserved(&self.extra),
    }
  }
}

// ─── History record ──────────────────────────────────────────────────────────

/// One recorded status change. Append-only; never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
  /// `None` when the record did not exist before this observation.
  pub from:      Option<EntityStatus>,
  pub to:        EntityStatus,
  pub timestamp: DateTime<Utc>,
}

/// The persisted state of a product in `productHistory`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url:            Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model:          Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub product_name:   Option<String>,
  #[serde(default)]
  pub status:         EntityStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_checked:   Option<DateTime<Utc>>,
  #[serde(default)]
  pub status_history: Vec<StatusTransition>,
  #[serde(flatten)]
  pub extra:          Map<String, Value>,
}

impl ProductRecord {
  /// Apply one observation: overwrite attributes, advance `last_checked`, and
  /// append a transition if the status changed.
  ///
  /// `is_new` marks a record that did not exist in the store; its transition
  /// is recorded with `from: None`.
  pub fn observe(
    &mut self,
    attrs: &ProductAttributes,
    status: EntityStatus,
    now: DateTime<Utc>,
    is_new: bool,
  ) -> Option<StatusTransition> {
    // Never step back behind the latest recorded activity.
    let at = self
      .status_history
      .last()
      .map(|t| t.timestamp)
      .into_iter()
      .chain(self.last_checked)
      .fold(now, std::cmp::max);

    let transition = (self.status != status).then(|| StatusTransition {
      from:      (!is_new).then_some(self.status),
      to:        status,
      timestamp: at,
    });
    if let Some(t) = &transition {
      self.status_history.push(t.clone());
    }

    if attrs.url.is_some() {
      self.url.clone_from(&attrs.url);
    }
    if attrs.model.is_some() {
      self.model.clone_from(&attrs.model);
    }
    if attrs.product_name.is_some() {
      self.product_name.clone_from(&attrs.product_name);
    }
    self.extra.extend(strip_reserved(&attrs.extra));

    self.status = status;
    self.last_checked = Some(at);

    transition
  }

  /// Timestamp of the latest status change, or `last_checked` when the record
  /// has never changed state.
  pub fn last_activity(&self) -> Option<DateTime<Utc>> {
    self
      .status_history
      .last()
      .map(|t| t.timestamp)
      .or(self.last_checked)
  }

  /// When the record most recently transitioned into `removed`.
  pub fn removed_at(&self) -> Option<DateTime<Utc>> {
    self
      .status_history
      .iter()
      .rev()
      .find(|t| t.to == EntityStatus::Removed)
      .map(|t| t.timestamp)
  }

  /// The record's price attribute as display text, if the scraper stored one.
  pub fn price(&self) -> Option<String> {
    match self.extra.get("price")? {
      Value::String(s) => Some(s.clone()),
      Value::Null => None,
      other => Some(other.to_string()),
    }
  }
}

fn strip_reserved(extra: &Map<String, Value>) -> Map<String, Value> {
  extra
    .iter()
    .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect()
}
