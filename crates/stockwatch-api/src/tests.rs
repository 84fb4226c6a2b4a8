//! Router-level tests driving the API with `tower::ServiceExt::oneshot`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use chrono::Utc;
use serde_json::{Value, json};
use stockwatch_core::{
  classify::Classifier,
  events::EventBus,
  fetch::{FetchMethod, FetchOutcome, Fetcher, HttpResponse},
  store::{KvStore, MemoryStore, keys},
};
use tower::ServiceExt;

use crate::{AppState, api_router};

const A: &str = "https://site/products/A";
const B: &str = "https://site/products/B";

/// Serves fixed pages; anything else is a 404.
#[derive(Clone, Default)]
struct PageFetcher {
  pages: Arc<HashMap<String, (u16, String)>>,
}

impl PageFetcher {
  fn new(pages: &[(&str, u16, &str)]) -> Self {
    Self {
      pages: Arc::new(
        pages
          .iter()
          .map(|(url, status, body)| ((*url).to_owned(), (*status, (*body).to_owned())))
          .collect(),
      ),
    }
  }
}

impl Fetcher for PageFetcher {
  async fn fetch<'a>(&'a self, url: &'a str, method: FetchMethod) -> FetchOutcome {
    let (status, body) = self.pages.get(url).cloned().unwrap_or((404, String::new()));
    Ok(HttpResponse {
      status,
      redirected: false,
      final_url: url.to_owned(),
      body: (method == FetchMethod::Get).then_some(body),
    })
  }
}

type State = AppState<MemoryStore, PageFetcher>;

async fn state_with(seed: &[(&str, Value)], pages: &[(&str, u16, &str)]) -> State {
  let store = Arc::new(MemoryStore::new());
  store
    .set(
      seed
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect(),
    )
    .await
    .unwrap();
  AppState::new(store, PageFetcher::new(pages), Classifier::default(), EventBus::default())
}

async fn call(state: &State, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
  let mut builder = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(v) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(v.to_string())
    }
    None => Body::empty(),
  };
  let resp = api_router(state.clone())
    .oneshot(builder.body(body).unwrap())
    .await
    .unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
    .await
    .unwrap();
  (status, bytes.to_vec())
}

async fn call_json(state: &State, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let (status, bytes) = call(state, method, uri, body).await;
  (status, serde_json::from_slice(&bytes).unwrap())
}

async fn wait_for_completion(state: &State) {
  for _ in 0..200 {
    let (_, status) = call_json(state, "GET", "/check/status", None).await;
    if status["phase"] == "completed" {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("check run did not complete");
}

fn days_ago(days: i64) -> String { (Utc::now() - chrono::Duration::days(days)).to_rfc3339() }

// ─── Checker ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_without_urls_fails() {
  let state = state_with(&[], &[]).await;
  let (status, body) = call_json(&state, "POST", "/check/start", Some(json!({}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], json!(false));
  assert_eq!(body["message"], json!("no URLs to check"));
}

#[tokio::test]
async fn start_runs_check_and_exports_csv() {
  let state = state_with(
    &[(keys::PRODUCTS, json!([{ "url": A, "model": "M1" }, { "url": B, "model": "M2" }]))],
    &[(A, 200, "<p>SOLD OUT</p>")],
  )
  .await;

  let (_, body) = call_json(
    &state,
    "POST",
    "/check/start",
    Some(json!({ "urlSource": "products", "delayMin": 0, "delayMax": 0 })),
  )
  .await;
  assert_eq!(body, json!({ "success": true, "urlCount": 2 }));
  assert_eq!(state.catalog.checker_settings().await.unwrap().delay_max, 0);

  wait_for_completion(&state).await;

  let (_, results) = call_json(&state, "GET", "/check/results", None).await;
  assert_eq!(results["outOfStock"].as_array().unwrap().len(), 1);
  assert_eq!(results["removed"].as_array().unwrap().len(), 1);

  let (status, csv) = call(&state, "GET", "/check/export", None).await;
  assert_eq!(status, StatusCode::OK);
  let csv = String::from_utf8(csv).unwrap();
  assert!(csv.starts_with('\u{feff}'));
  assert!(csv.contains("\"품절\""));
  assert!(csv.contains("\"삭제됨\""));

  let (_, removed) = call_json(&state, "GET", "/products/removed", None).await;
  assert_eq!(removed[0]["url"], json!(B));
}

#[tokio::test]
async fn stop_when_idle_reports_failure() {
  let state = state_with(&[], &[]).await;
  let (_, body) = call_json(&state, "POST", "/check/stop", None).await;
  assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn export_without_results_is_not_found() {
  let state = state_with(&[], &[]).await;
  let (status, body) = call_json(&state, "GET", "/check/export", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].is_string());
}

// ─── History ──────────────────────────────────────────────────────────────────

async fn state_with_history() -> State {
  state_with(
    &[(
      keys::PRODUCT_HISTORY,
      json!({
        A: {
          "url": A,
          "model": "M1",
          "status": "removed",
          "lastChecked": days_ago(1),
          "statusHistory": [
            { "from": null, "to": "active", "timestamp": days_ago(40) },
            { "from": "active", "to": "removed", "timestamp": days_ago(1) }
          ]
        },
        B: {
          "url": B,
          "status": "active",
          "lastChecked": days_ago(2),
          "statusHistory": []
        }
      }),
    )],
    &[],
  )
  .await
}

#[tokio::test]
async fn history_view_filters_by_status() {
  let state = state_with_history().await;

  let (_, all) = call_json(&state, "GET", "/history?status=all&periodDays=30", None).await;
  assert_eq!(all.as_array().unwrap().len(), 2);
  assert_eq!(all[0]["url"], json!(A));

  let (_, removed) = call_json(&state, "GET", "/history?status=removed", None).await;
  assert_eq!(removed.as_array().unwrap().len(), 1);

  let (_, changed) = call_json(&state, "GET", "/products/changed", None).await;
  assert_eq!(changed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn history_view_rejects_unknown_status() {
  let state = state_with_history().await;
  let (status, body) = call_json(&state, "GET", "/history?status=gone", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("gone"));
}

#[tokio::test]
async fn history_export_is_csv() {
  let state = state_with_history().await;
  let (status, csv) = call(&state, "GET", "/history/export?status=removed", None).await;
  assert_eq!(status, StatusCode::OK);
  let csv = String::from_utf8(csv).unwrap();
  assert!(csv.contains("정상 판매 → 삭제됨"));
  assert_eq!(csv.lines().count(), 2);
}

#[tokio::test]
async fn recently_removed_honours_days() {
  let state = state_with_history().await;
  let (_, recent) = call_json(&state, "GET", "/products/removed?days=7", None).await;
  assert_eq!(recent.as_array().unwrap().len(), 1);

  let (status, _) = call(&state, "GET", "/products/removed?days=-1", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─── Tracking & settings ──────────────────────────────────────────────────────

#[tokio::test]
async fn settings_update_roundtrip() {
  let state = state_with(&[], &[]).await;

  let (_, defaults) = call_json(&state, "GET", "/settings", None).await;
  assert_eq!(
    defaults,
    json!({ "autoTracking": true, "intervalHours": 24, "periodDays": 30 })
  );

  let (status, updated) = call_json(
    &state,
    "PUT",
    "/settings",
    Some(json!({ "intervalHours": 6, "periodDays": 7 })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(
    updated,
    json!({ "autoTracking": true, "intervalHours": 6, "periodDays": 7 })
  );

  let (status, _) =
    call_json(&state, "PUT", "/settings", Some(json!({ "intervalHours": 0 }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tracking_run_records_last_tracked() {
  let state = state_with_history().await;
  let (_, body) = call_json(&state, "POST", "/tracking/run", None).await;
  assert_eq!(body, json!({ "success": true }));

  for _ in 0..200 {
    let (_, status) = call_json(&state, "GET", "/tracking/status", None).await;
    if !status["lastTracked"].is_null() && status["isTracking"] == json!(false) {
      assert!(status["nextRun"].is_string());
      // Both pages are 404 for the existence check.
      let history = state.catalog.history().await.unwrap();
      assert_eq!(history[B].status.as_ref(), "removed");
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("tracking cycle did not finish");
}
