//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use stockwatch_core::{
  checker::UrlChecker,
  classify::Classifier,
  events::EventBus,
  fetch::{FetchMethod, FetchOutcome, Fetcher, HttpResponse},
  history::StatusHistory,
  product::{CatalogProduct, EntityStatus, ProductAttributes},
  scheduler::Scheduler,
  settings::{CheckerSettings, CheckerSettingsUpdate, SourceFilter, TrackingSettings},
  store::{Catalog, KvStore, keys},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn items(pairs: &[(&str, Value)]) -> Map<String, Value> {
  pairs
    .iter()
    .map(|(k, v)| ((*k).to_owned(), v.clone()))
    .collect()
}

// ─── Raw key-value behaviour ─────────────────────────────────────────────────

#[tokio::test]
async fn get_returns_only_present_keys() {
  let s = store().await;
  s.set(items(&[("a", json!(1)), ("b", json!({ "x": [1, 2] }))]))
    .await
    .unwrap();

  let got = s.get(&["a", "b", "missing"]).await.unwrap();
  assert_eq!(got.len(), 2);
  assert_eq!(got["a"], json!(1));
  assert_eq!(got["b"], json!({ "x": [1, 2] }));
}

#[tokio::test]
async fn set_overwrites_existing_value() {
  let s = store().await;
  s.set(items(&[("k", json!("old"))])).await.unwrap();
  s.set(items(&[("k", json!("new"))])).await.unwrap();

  let got = s.get(&["k"]).await.unwrap();
  assert_eq!(got["k"], json!("new"));
  assert_eq!(s.keys().await.unwrap(), vec!["k".to_owned()]);
}

#[tokio::test]
async fn set_with_empty_map_is_a_noop() {
  let s = store().await;
  s.set(Map::new()).await.unwrap();
  assert!(s.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_deletes_keys_and_ignores_missing() {
  let s = store().await;
  s.set(items(&[("a", json!(1)), ("b", json!(2))])).await.unwrap();
  s.remove(&["a", "nope"]).await.unwrap();

  assert_eq!(s.keys().await.unwrap(), vec!["b".to_owned()]);
}

#[tokio::test]
async fn corrupt_value_is_reported_with_its_key() {
  let s = store().await;
  s.conn
    .call(|conn| {
      conn.execute(
        "INSERT INTO kv (key, value_json, updated_at) VALUES ('bad', '{not json', 'x')",
        [],
      )?;
      Ok(())
    })
    .await
    .unwrap();

  match s.get(&["bad"]).await {
    Err(Error::Json { key, .. }) => assert_eq!(key, "bad"),
    other => panic!("expected json error, got {other:?}"),
  }
}

#[tokio::test]
async fn data_survives_reopen() {
  let dir = std::env::temp_dir().join(format!("stockwatch-test-{}", std::process::id()));
  std::fs::create_dir_all(&dir).unwrap();
  let path = dir.join("reopen.db");
  let _ = std::fs::remove_file(&path);

  {
    let s = SqliteStore::open(&path).await.unwrap();
    s.set(items(&[(keys::LAST_TRACKED, json!("2025-01-01T00:00:00Z"))]))
      .await
      .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  let got = s.get(&[keys::LAST_TRACKED]).await.unwrap();
  assert_eq!(got[keys::LAST_TRACKED], json!("2025-01-01T00:00:00Z"));

  let _ = std::fs::remove_dir_all(&dir);
}

// ─── Through the typed catalog ───────────────────────────────────────────────

#[tokio::test]
async fn catalog_settings_roundtrip() {
  let catalog = Catalog::new(Arc::new(store().await));

  let settings = CheckerSettings {
    url_source: SourceFilter::History,
    delay_min: 4,
    delay_max: 9,
    ..CheckerSettings::default()
  };
  catalog.save_checker_settings(&settings).await.unwrap();
  assert_eq!(catalog.checker_settings().await.unwrap(), settings);

  let tracking = TrackingSettings { auto_tracking: false, interval_hours: 12 };
  catalog.save_tracking_settings(&tracking).await.unwrap();
  assert_eq!(catalog.tracking_settings().await.unwrap(), tracking);
}

#[tokio::test]
async fn history_merges_persist_across_handles() {
  let store = Arc::new(store().await);
  let history = StatusHistory::new(Catalog::new(Arc::clone(&store)), EventBus::default());

  let attrs = ProductAttributes::from_url("https://site/products/A");
  history.merge_observation(&attrs, EntityStatus::Active).await.unwrap();
  history.merge_observation(&attrs, EntityStatus::Removed).await.unwrap();

  let fresh = StatusHistory::new(Catalog::new(store), EventBus::default());
  let removed = fresh.removed_products().await.unwrap();
  assert_eq!(removed.len(), 1);
  assert_eq!(removed[0].status_history.len(), 2);
}

#[tokio::test]
async fn sources_read_scraper_layout() {
  let s = store().await;
  s.set(items(&[
    (
      keys::PRODUCTS,
      json!([{ "url": "https://site/products/A", "model": "M1", "price": "₩10" }]),
    ),
    (keys::OUT_OF_STOCK_PRODUCTS, json!([])),
  ]))
  .await
  .unwrap();

  let sources = Catalog::new(Arc::new(s)).sources().await.unwrap();
  assert_eq!(sources.products.len(), 1);
  assert_eq!(sources.products[0].extra["price"], json!("₩10"));
  assert!(sources.history.is_empty());
}

// ─── Engines over SQLite ─────────────────────────────────────────────────────

/// Answers every request with the same status and body.
#[derive(Clone)]
struct FixedFetcher {
  status: u16,
  body:   &'static str,
}

impl Fetcher for FixedFetcher {
  async fn fetch<'a>(&'a self, url: &'a str, method: FetchMethod) -> FetchOutcome {
    Ok(HttpResponse {
      status:     self.status,
      redirected: false,
      final_url:  url.to_owned(),
      body:       (method == FetchMethod::Get).then(|| self.body.to_owned()),
    })
  }
}

fn product_urls(n: usize) -> Vec<String> {
  (0..n).map(|i| format!("https://site/products/P{i}")).collect()
}

#[tokio::test]
async fn tracking_cycle_removes_every_product_in_a_batch() {
  let urls = product_urls(5);
  let catalog = Catalog::new(Arc::new(store().await));
  let seeded: Map<String, Value> = urls
    .iter()
    .map(|url| (url.clone(), json!({ "url": url, "status": "active" })))
    .collect();
  catalog.set(keys::PRODUCT_HISTORY, &seeded).await.unwrap();

  let scheduler = Scheduler::new(
    catalog.clone(),
    FixedFetcher { status: 404, body: "" },
    Classifier::default(),
    EventBus::default(),
  );
  assert!(scheduler.run_cycle().await);

  let history = catalog.history().await.unwrap();
  assert_eq!(history.len(), 5);
  for record in history.values() {
    assert_eq!(record.status, EntityStatus::Removed);
    assert_eq!(record.status_history.len(), 1);
    assert_eq!(record.status_history[0].from, Some(EntityStatus::Active));
  }
}

#[tokio::test]
async fn check_run_keeps_every_out_of_stock_entry() {
  let urls = product_urls(5);
  let catalog = Catalog::new(Arc::new(store().await));
  let products: Vec<CatalogProduct> = urls.iter().map(ProductAttributes::from_url).collect();
  catalog.save_products(&products).await.unwrap();

  let checker = UrlChecker::new(
    catalog.clone(),
    FixedFetcher { status: 200, body: "<p>Sold out</p>" },
    Classifier::default(),
    EventBus::default(),
  );
  checker.update_settings(&CheckerSettingsUpdate {
    delay_min: Some(0),
    delay_max: Some(0),
    batch_size: Some(5),
    ..CheckerSettingsUpdate::default()
  });
  assert_eq!(checker.initialize(SourceFilter::Products).await, 5);
  assert!(checker.start().await);

  assert_eq!(catalog.out_of_stock().await.unwrap().len(), 5);
  let history = catalog.history().await.unwrap();
  assert_eq!(history.len(), 5);
  assert!(history.values().all(|r| r.status == EntityStatus::OutOfStock));
}
