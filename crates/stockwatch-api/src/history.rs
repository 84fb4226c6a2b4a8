//! Handlers for status-history queries and exports.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/products/removed` | Optional `?days=N` for recent removals only |
//! | `GET`  | `/products/removed/export` | CSV; same filter |
//! | `GET`  | `/products/changed` | Records with at least one transition |
//! | `GET`  | `/history` | `?status=all\|active\|out_of_stock\|removed\|unknown&periodDays=N` |
//! | `GET`  | `/history/export` | CSV; same filter |

use axum::{
  Json,
  extract::{Query, State},
  response::Response,
};
use chrono::{Local, Utc};
use serde::Deserialize;
use stockwatch_core::{
  fetch::Fetcher,
  product::{EntityStatus, ProductRecord},
  report,
  store::KvStore,
};

use crate::{AppState, csv_download, error::ApiError};

// ─── Removed products ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RemovedParams {
  pub days: Option<i64>,
}

async fn removed_records<S, F>(
  state: &AppState<S, F>,
  params: &RemovedParams,
) -> Result<Vec<ProductRecord>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  let history = state.checker.history();
  Ok(match params.days {
    Some(days) if days < 0 => {
      return Err(ApiError::BadRequest("days must not be negative".into()));
    }
    Some(days) => history.recently_removed(days).await?,
    None => history.removed_products().await?,
  })
}

/// `GET /products/removed[?days=N]`
pub async fn removed<S, F>(
  State(state): State<AppState<S, F>>,
  Query(params): Query<RemovedParams>,
) -> Result<Json<Vec<ProductRecord>>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  Ok(Json(removed_records(&state, &params).await?))
}

/// `GET /products/removed/export[?days=N]`
pub async fn export_removed<S, F>(
  State(state): State<AppState<S, F>>,
  Query(params): Query<RemovedParams>,
) -> Result<Response, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  let records = removed_records(&state, &params).await?;
  if records.is_empty() {
    return Err(ApiError::NotFound("no removed products to export".into()));
  }
  let name = report::removed_report_filename(Utc::now(), &Local);
  Ok(csv_download(&name, report::removed_report(&records, &Local)))
}

/// `GET /products/changed`
pub async fn changed<S, F>(
  State(state): State<AppState<S, F>>,
) -> Result<Json<Vec<ProductRecord>>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  Ok(Json(state.checker.history().status_changed_products().await?))
}

// ─── History view ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
  /// A status name, or `all`.
  pub status:      Option<String>,
  /// Defaults to the persisted `periodDays`.
  pub period_days: Option<u32>,
}

fn parse_status(raw: Option<&str>) -> Result<Option<EntityStatus>, ApiError> {
  match raw {
    None | Some("") | Some("all") => Ok(None),
    Some(s) => s
      .parse()
      .map(Some)
      .map_err(|_| ApiError::BadRequest(format!("unknown status {s:?}"))),
  }
}

async fn view_records<S, F>(
  state: &AppState<S, F>,
  params: &HistoryParams,
) -> Result<Vec<ProductRecord>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  let status = parse_status(params.status.as_deref())?;
  let period_days = match params.period_days {
    Some(days) => days,
    None => state.catalog.period_days().await?,
  };
  Ok(
    state
      .checker
      .history()
      .history_view(status, i64::from(period_days))
      .await?,
  )
}

/// `GET /history[?status=...][&periodDays=N]`
pub async fn view<S, F>(
  State(state): State<AppState<S, F>>,
  Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ProductRecord>>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  Ok(Json(view_records(&state, &params).await?))
}

/// `GET /history/export[?status=...][&periodDays=N]`
pub async fn export<S, F>(
  State(state): State<AppState<S, F>>,
  Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  let records = view_records(&state, &params).await?;
  if records.is_empty() {
    return Err(ApiError::NotFound("no history records to export".into()));
  }
  let name = report::history_report_filename(Utc::now(), &Local);
  Ok(csv_download(&name, report::history_report(&records, &Local)))
}
