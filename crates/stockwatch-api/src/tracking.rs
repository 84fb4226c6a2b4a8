//! Handlers for removed-product tracking and its settings.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/tracking/run` | One-off cycle in the background |
//! | `GET`  | `/tracking/status` | Includes the next planned run |
//! | `GET`  | `/settings` | |
//! | `PUT`  | `/settings` | Body: `{"autoTracking":true,"intervalHours":12,"periodDays":7}`, all optional |

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockwatch_core::{
  fetch::Fetcher,
  scheduler::{NextRun, plan_next_run},
  settings::TrackingSettings,
  store::KvStore,
};
use tracing::info;

use crate::{AppState, CommandResponse, error::ApiError};

// ─── Run ──────────────────────────────────────────────────────────────────────

/// `POST /tracking/run`
pub async fn run<S, F>(State(state): State<AppState<S, F>>) -> Json<CommandResponse>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  if state.scheduler.is_tracking() {
    return CommandResponse::failed("tracking is already in progress");
  }
  let scheduler = state.scheduler.clone();
  tokio::spawn(async move { scheduler.run_cycle().await });
  info!("tracking cycle requested");
  CommandResponse::ok()
}

// ─── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
  pub is_tracking:    bool,
  pub auto_tracking:  bool,
  pub interval_hours: u32,
  pub last_tracked:   Option<DateTime<Utc>>,
  /// `None` when auto-tracking is off.
  pub next_run:       Option<DateTime<Utc>>,
}

/// `GET /tracking/status`
pub async fn status<S, F>(
  State(state): State<AppState<S, F>>,
) -> Result<Json<TrackingStatus>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  let settings = state.catalog.tracking_settings().await?;
  let last_tracked = state.scheduler.last_tracked().await?;
  let now = Utc::now();
  let next_run = settings.auto_tracking.then(|| {
    match plan_next_run(last_tracked, settings.interval_hours, now) {
      NextRun::Immediate => now,
      NextRun::At(at) => at,
    }
  });

  Ok(Json(TrackingStatus {
    is_tracking: state.scheduler.is_tracking(),
    auto_tracking: settings.auto_tracking,
    interval_hours: settings.interval_hours,
    last_tracked,
    next_run,
  }))
}

// ─── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
  pub auto_tracking:  bool,
  pub interval_hours: u32,
  pub period_days:    u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
  pub auto_tracking:  Option<bool>,
  pub interval_hours: Option<u32>,
  pub period_days:    Option<u32>,
}

/// `GET /settings`
pub async fn get_settings<S, F>(
  State(state): State<AppState<S, F>>,
) -> Result<Json<SettingsView>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  let tracking = state.catalog.tracking_settings().await?;
  Ok(Json(SettingsView {
    auto_tracking:  tracking.auto_tracking,
    interval_hours: tracking.interval_hours,
    period_days:    state.catalog.period_days().await?,
  }))
}

/// `PUT /settings`
pub async fn update_settings<S, F>(
  State(state): State<AppState<S, F>>,
  Json(body): Json<SettingsUpdate>,
) -> Result<Json<SettingsView>, ApiError>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  if body.interval_hours == Some(0) {
    return Err(ApiError::BadRequest("intervalHours must be at least 1".into()));
  }
  if body.period_days == Some(0) {
    return Err(ApiError::BadRequest("periodDays must be at least 1".into()));
  }

  let current = state.catalog.tracking_settings().await?;
  let tracking = TrackingSettings {
    auto_tracking:  body.auto_tracking.unwrap_or(current.auto_tracking),
    interval_hours: body.interval_hours.unwrap_or(current.interval_hours),
  };
  state.catalog.save_tracking_settings(&tracking).await?;
  if let Some(days) = body.period_days {
    state.catalog.save_period_days(days).await?;
  }
  info!(
    auto_tracking = tracking.auto_tracking,
    interval_hours = tracking.interval_hours,
    "tracking settings updated"
  );

  Ok(Json(SettingsView {
    auto_tracking:  tracking.auto_tracking,
    interval_hours: tracking.interval_hours,
    period_days:    state.catalog.period_days().await?,
  }))
}
