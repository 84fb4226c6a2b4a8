//! Handlers for `/check` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/check/start` | Body: partial `urlCheckerSettings`, e.g. `{"urlSource":"all","delayMin":3}` |
//! | `POST` | `/check/stop` | |
//! | `GET`  | `/check/status` | Phase, progress and effective settings |
//! | `GET`  | `/check/results` | Results bucketed by outcome |
//! | `GET`  | `/check/export` | CSV download; 404 when there is nothing to export |

use axum::{
  Json,
  extract::State,
  response::Response,
};
use chrono::{Local, Utc};
use stockwatch_core::{
  checker::CheckerStatus,
  fetch::Fetcher,
  product::ResultBuckets,
  report,
  settings::CheckerSettingsUpdate,
  store::KvStore,
};
use tracing::info;

use crate::{AppState, CommandResponse, csv_download, error::ApiError};

// ─── Start / stop ─────────────────────────────────────────────────────────────

/// `POST /check/start`
///
/// Merges the body into the persisted settings, reloads the URL list and
/// starts the run in the background.
pub async fn start<S, F>(
  State(state): State<AppState<S, F>>,
  Json(update): Json<CheckerSettingsUpdate>,
) -> Result<Json<CommandResponse>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  if state.checker.is_running() {
    return Ok(CommandResponse::failed("a check run is already in progress"));
  }

  let mut settings = state.catalog.checker_settings().await?;
  settings.apply(&update);
  state.catalog.save_checker_settings(&settings).await?;
  state.checker.update_settings(&settings.into());

  let url_count = state.checker.initialize(settings.url_source).await;
  if url_count == 0 {
    return Ok(CommandResponse::failed("no URLs to check"));
  }
  if !state.checker.spawn() {
    return Ok(CommandResponse::failed("a check run is already in progress"));
  }

  info!(url_count, source = settings.url_source.as_ref(), "check run requested");
  Ok(CommandResponse::started(url_count))
}

/// `POST /check/stop`
pub async fn stop<S, F>(State(state): State<AppState<S, F>>) -> Json<CommandResponse>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  if state.checker.stop() {
    CommandResponse::ok()
  } else {
    CommandResponse::failed("no check run in progress")
  }
}

// ─── Snapshots ────────────────────────────────────────────────────────────────

/// `GET /check/status`
pub async fn status<S, F>(State(state): State<AppState<S, F>>) -> Json<CheckerStatus>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  Json(state.checker.status())
}

/// `GET /check/results`
pub async fn results<S, F>(State(state): State<AppState<S, F>>) -> Json<ResultBuckets>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  Json(state.checker.results())
}

/// `GET /check/export`
pub async fn export<S, F>(State(state): State<AppState<S, F>>) -> Result<Response, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  let results = state.checker.results();
  if results.is_empty() {
    return Err(ApiError::NotFound("no check results to export".into()));
  }
  let name = report::check_report_filename(Utc::now(), &Local);
  Ok(csv_download(&name, report::check_report(&results, &Local)))
}
