//! JSON command API for stockwatch.
//!
//! Exposes an axum [`Router`] over the URL checker, the tracking scheduler and
//! the status history, backed by any [`KvStore`] and [`Fetcher`]. Auth, TLS,
//! and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", stockwatch_api::api_router(state.clone()))
//! ```

pub mod checker;
pub mod error;
pub mod history;
pub mod tracking;

use std::sync::Arc;

use axum::{
  Json, Router,
  http::header,
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde::Serialize;
use stockwatch_core::{
  checker::UrlChecker,
  classify::Classifier,
  events::EventBus,
  fetch::Fetcher,
  scheduler::Scheduler,
  store::{Catalog, KvStore},
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S, F> {
  pub catalog:   Catalog<S>,
  pub checker:   UrlChecker<S, F>,
  pub scheduler: Scheduler<S, F>,
}

impl<S, F> Clone for AppState<S, F> {
  fn clone(&self) -> Self {
    Self {
      catalog:   self.catalog.clone(),
      checker:   self.checker.clone(),
      scheduler: self.scheduler.clone(),
    }
  }
}

impl<S: KvStore, F: Fetcher + Clone> AppState<S, F> {
  /// Wire a checker and a scheduler over the same store and event bus.
  pub fn new(store: Arc<S>, fetcher: F, classifier: Classifier, events: EventBus) -> Self {
    let catalog = Catalog::new(store);
    Self {
      checker: UrlChecker::new(
        catalog.clone(),
        fetcher.clone(),
        classifier.clone(),
        events.clone(),
      ),
      scheduler: Scheduler::new(catalog.clone(), fetcher, classifier, events),
      catalog,
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, F>(state: AppState<S, F>) -> Router<()>
where
  S: KvStore + 'static,
  F: Fetcher + 'static,
{
  Router::new()
    // URL checker
    .route("/check/start", post(checker::start::<S, F>))
    .route("/check/stop", post(checker::stop::<S, F>))
    .route("/check/status", get(checker::status::<S, F>))
    .route("/check/results", get(checker::results::<S, F>))
    .route("/check/export", get(checker::export::<S, F>))
    // Removed-product tracking
    .route("/tracking/run", post(tracking::run::<S, F>))
    .route("/tracking/status", get(tracking::status::<S, F>))
    .route(
      "/settings",
      get(tracking::get_settings::<S, F>).put(tracking::update_settings::<S, F>),
    )
    // Status history
    .route("/products/removed", get(history::removed::<S, F>))
    .route("/products/removed/export", get(history::export_removed::<S, F>))
    .route("/products/changed", get(history::changed::<S, F>))
    .route("/history", get(history::view::<S, F>))
    .route("/history/export", get(history::export::<S, F>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Shared responses ─────────────────────────────────────────────────────────

/// Reply shape for commands: `{success}` plus an optional URL count or
/// failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
  pub success:   bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url_count: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message:   Option<String>,
}

impl CommandResponse {
  pub fn ok() -> Json<Self> {
    Json(Self { success: true, url_count: None, message: None })
  }

  pub fn started(url_count: usize) -> Json<Self> {
    Json(Self { success: true, url_count: Some(url_count), message: None })
  }

  pub fn failed(message: impl Into<String>) -> Json<Self> {
    Json(Self { success: false, url_count: None, message: Some(message.into()) })
  }
}

/// A CSV download with a suggested file name.
pub(crate) fn csv_download(filename: &str, body: String) -> Response {
  (
    [
      (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
      (
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\""),
      ),
    ],
    body,
  )
    .into_response()
}

#[cfg(test)]
mod tests;
