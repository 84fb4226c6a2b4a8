//! The status history tracker: the single place product records change.
//!
//! Every status-changing code path (the URL checker and the scheduled
//! tracking cycle) goes through [`StatusHistory::merge_observation`], which
//! appends to a record's `statusHistory` only when its status actually
//! changes. The audit log is therefore append-only and its last entry always
//! matches the record's current status.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::{
  Result,
  events::{Event, EventBus},
  product::{EntityStatus, ProductAttributes, ProductRecord},
  store::{Catalog, KvStore, ProductHistory},
};

pub struct StatusHistory<S> {
  catalog: Catalog<S>,
  events:  EventBus,
}

impl<S> Clone for StatusHistory<S> {
  fn clone(&self) -> Self {
    Self { catalog: self.catalog.clone(), events: self.events.clone() }
  }
}

impl<S: KvStore> StatusHistory<S> {
  pub fn new(catalog: Catalog<S>, events: EventBus) -> Self { Self { catalog, events } }

  /// Create the `productHistory` collection if it does not exist yet.
  pub async fn ensure_initialized(&self) -> Result<()> {
    let _writes = self.catalog.lock_writes().await;
    if self
      .catalog
      .get::<ProductHistory>(crate::store::keys::PRODUCT_HISTORY)
      .await?
      .is_none()
    {
      self.catalog.save_history(&ProductHistory::new()).await?;
      info!("initialised empty product history");
    }
    Ok(())
  }

  /// Merge one observation into the persisted record and return it.
  ///
  /// Returns `Ok(None)` without touching the store when the observation has
  /// neither a URL nor a model.
  pub async fn merge_observation(
    &self,
    attrs: &ProductAttributes,
    status: EntityStatus,
  ) -> Result<Option<ProductRecord>> {
    self.merge_observation_at(attrs, status, Utc::now()).await
  }

  /// [`merge_observation`](Self::merge_observation) at an explicit time.
  /// A `now` older than the record's latest activity is clamped to it.
  pub async fn merge_observation_at(
    &self,
    attrs: &ProductAttributes,
    status: EntityStatus,
    now: DateTime<Utc>,
  ) -> Result<Option<ProductRecord>> {
    let Some(key) = attrs.key().map(str::to_owned) else {
      warn!(?attrs, "observation has no url or model; skipping");
      return Ok(None);
    };

    let (record, transition) = {
      let _writes = self.catalog.lock_writes().await;
      let mut history = self.catalog.history().await?;
      let is_new = !history.contains_key(&key);
      let record = history.entry(key.clone()).or_default();
      let transition = record.observe(attrs, status, now, is_new);
      let record = record.clone();
      self.catalog.save_history(&history).await?;
      (record, transition)
    };

    match transition {
      Some(transition) => {
        info!(%key, from = ?transition.from, to = ?transition.to, "status changed");
        self.events.publish(Event::StatusChanged { key, transition });
      }
      None => debug!(%key, ?status, "status unchanged"),
    }

    Ok(Some(record))
  }

  /// Remove every record. Explicit bulk clear; nothing calls this
  /// automatically.
  pub async fn clear(&self) -> Result<usize> {
    let _writes = self.catalog.lock_writes().await;
    let count = self.catalog.history().await?.len();
    self.catalog.save_history(&ProductHistory::new()).await?;
    info!(count, "cleared product history");
    Ok(count)
  }

  pub async fn records(&self) -> Result<Vec<ProductRecord>> {
    Ok(self.catalog.history().await?.into_values().collect())
  }

  /// Records whose current status is `removed`.
  pub async fn removed_products(&self) -> Result<Vec<ProductRecord>> {
    Ok(removed(self.records().await?))
  }

  /// Removed records whose latest transition into `removed` happened within
  /// the last `days` days.
  pub async fn recently_removed(&self, days: i64) -> Result<Vec<ProductRecord>> {
    Ok(recently_removed(self.records().await?, days, Utc::now()))
  }

  /// Records that have changed state at least once.
  pub async fn status_changed_products(&self) -> Result<Vec<ProductRecord>> {
    Ok(status_changed(self.records().await?))
  }

  /// Records for the history view, newest activity first.
  pub async fn history_view(
    &self,
    status: Option<EntityStatus>,
    period_days: i64,
  ) -> Result<Vec<ProductRecord>> {
    Ok(history_view(self.records().await?, status, period_days, Utc::now()))
  }
}

// ─── Pure queries ────────────────────────────────────────────────────────────

pub fn removed(records: impl IntoIterator<Item = ProductRecord>) -> Vec<ProductRecord> {
  records
    .into_iter()
    .filter(|r| r.status == EntityStatus::Removed)
    .collect()
}

pub fn recently_removed(
  records: impl IntoIterator<Item = ProductRecord>,
  days: i64,
  now: DateTime<Utc>,
) -> Vec<ProductRecord> {
  let cutoff = now - Duration::days(days);
  removed(records)
    .into_iter()
    .filter(|r| r.removed_at().is_some_and(|at| at >= cutoff))
    .collect()
}

pub fn status_changed(records: impl IntoIterator<Item = ProductRecord>) -> Vec<ProductRecord> {
  records
    .into_iter()
    .filter(|r| !r.status_history.is_empty())
    .collect()
}

/// Filter by status (when given) and by activity in the last `period_days`:
/// any transition in the period or, for records that never changed,
/// `lastChecked` in the period.
pub fn history_view(
  records: impl IntoIterator<Item = ProductRecord>,
  status: Option<EntityStatus>,
  period_days: i64,
  now: DateTime<Utc>,
) -> Vec<ProductRecord> {
  let cutoff = now - Duration::days(period_days);
  let mut out: Vec<ProductRecord> = records
    .into_iter()
    .filter(|r| status.is_none_or(|s| r.status == s))
    .filter(|r| {
      if r.status_history.is_empty() {
        r.last_checked.is_some_and(|at| at >= cutoff)
      } else {
        r.status_history.iter().any(|t| t.timestamp >= cutoff)
      }
    })
    .collect();
  out.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
  out
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::TimeZone;

  use super::*;
  use crate::{product::StatusTransition, store::MemoryStore};

  fn tracker() -> (StatusHistory<MemoryStore>, EventBus) {
    let events = EventBus::default();
    let catalog = Catalog::new(Arc::new(MemoryStore::new()));
    (StatusHistory::new(catalog, events.clone()), events)
  }

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap() }

  fn attrs(url: &str) -> ProductAttributes { ProductAttributes::from_url(url) }

  fn record(status: EntityStatus, history: &[(EntityStatus, DateTime<Utc>)]) -> ProductRecord {
    let mut prev = None;
    let status_history = history
      .iter()
      .map(|(to, at)| {
        let t = StatusTransition { from: prev, to: *to, timestamp: *at };
        prev = Some(*to);
        t
      })
      .collect();
    ProductRecord {
      url: Some("u".into()),
      status,
      status_history,
      last_checked: history.last().map(|(_, at)| *at),
      ..ProductRecord::default()
    }
  }

  #[tokio::test]
  async fn first_observation_creates_record_with_transition_from_none() {
    let (t, _) = tracker();
    let rec = t
      .merge_observation(&attrs("https://site/products/A"), EntityStatus::Active)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(rec.status, EntityStatus::Active);
    assert_eq!(rec.status_history.len(), 1);
    assert_eq!(rec.status_history[0].from, None);
    assert!(rec.last_checked.is_some());
  }

  #[tokio::test]
  async fn repeated_status_appends_once() {
    let (t, _) = tracker();
    let a = attrs("https://site/products/A");
    t.merge_observation(&a, EntityStatus::Active).await.unwrap();
    let rec = t.merge_observation(&a, EntityStatus::Active).await.unwrap().unwrap();
    assert_eq!(rec.status_history.len(), 1);
  }

  #[tokio::test]
  async fn active_then_removed_appends_transition_and_publishes() {
    let (t, events) = tracker();
    let a = attrs("https://site/products/A");
    t.merge_observation(&a, EntityStatus::Active).await.unwrap();

    let mut rx = events.subscribe();
    let rec = t.merge_observation(&a, EntityStatus::Removed).await.unwrap().unwrap();

    assert_eq!(rec.status_history.len(), 2);
    let last = rec.status_history.last().unwrap();
    assert_eq!(last.from, Some(EntityStatus::Active));
    assert_eq!(last.to, EntityStatus::Removed);

    match rx.recv().await.unwrap() {
      Event::StatusChanged { key, transition } => {
        assert_eq!(key, "https://site/products/A");
        assert_eq!(transition.to, EntityStatus::Removed);
      }
      other => panic!("unexpected event {other:?}"),
    }
  }

  #[tokio::test]
  async fn unknown_first_observation_records_no_transition() {
    let (t, _) = tracker();
    let rec = t
      .merge_observation(&attrs("u"), EntityStatus::Unknown)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(rec.status, EntityStatus::Unknown);
    assert!(rec.status_history.is_empty());
  }

  #[tokio::test]
  async fn model_is_fallback_key() {
    let (t, _) = tracker();
    let a = ProductAttributes { model: Some("M42".into()), ..ProductAttributes::default() };
    t.merge_observation(&a, EntityStatus::OutOfStock).await.unwrap();
    let records = t.records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model.as_deref(), Some("M42"));
  }

  #[tokio::test]
  async fn keyless_observation_is_a_noop() {
    let (t, _) = tracker();
    let got = t
      .merge_observation(&ProductAttributes::default(), EntityStatus::Active)
      .await
      .unwrap();
    assert!(got.is_none());
    assert!(t.records().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn attributes_are_last_write_wins() {
    let (t, _) = tracker();
    let mut a = attrs("u");
    a.product_name = Some("Old".into());
    t.merge_observation(&a, EntityStatus::Active).await.unwrap();
    a.product_name = Some("New".into());
    let rec = t.merge_observation(&a, EntityStatus::Active).await.unwrap().unwrap();
    assert_eq!(rec.product_name.as_deref(), Some("New"));
  }

  #[tokio::test]
  async fn clear_empties_history() {
    let (t, _) = tracker();
    t.merge_observation(&attrs("a"), EntityStatus::Active).await.unwrap();
    t.merge_observation(&attrs("b"), EntityStatus::Active).await.unwrap();
    assert_eq!(t.clear().await.unwrap(), 2);
    assert!(t.records().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn ensure_initialized_keeps_existing_history() {
    let (t, _) = tracker();
    t.merge_observation(&attrs("a"), EntityStatus::Active).await.unwrap();
    t.ensure_initialized().await.unwrap();
    assert_eq!(t.records().await.unwrap().len(), 1);
  }

  #[test]
  fn recently_removed_uses_latest_removal() {
    let old = now() - Duration::days(30);
    let recent = now() - Duration::days(2);
    let records = vec![
      record(EntityStatus::Removed, &[(EntityStatus::Active, old), (EntityStatus::Removed, old)]),
      record(
        EntityStatus::Removed,
        &[(EntityStatus::Active, old), (EntityStatus::Removed, recent)],
      ),
      record(EntityStatus::Active, &[(EntityStatus::Removed, recent), (EntityStatus::Active, recent)]),
    ];
    let got = recently_removed(records, 7, now());
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].removed_at(), Some(recent));
  }

  #[test]
  fn status_changed_requires_history() {
    let records = vec![
      record(EntityStatus::Active, &[]),
      record(EntityStatus::Active, &[(EntityStatus::Active, now())]),
    ];
    assert_eq!(status_changed(records).len(), 1);
  }

  #[test]
  fn history_view_filters_and_sorts() {
    let d = |n| now() - Duration::days(n);
    let mut quiet = record(EntityStatus::Active, &[]);
    quiet.last_checked = Some(d(1));
    let stale = record(EntityStatus::Removed, &[(EntityStatus::Removed, d(90))]);
    let fresh = record(EntityStatus::Removed, &[(EntityStatus::Removed, d(3))]);
    let fresher = record(EntityStatus::OutOfStock, &[(EntityStatus::OutOfStock, d(2))]);

    let all = history_view(
      vec![quiet.clone(), stale.clone(), fresh.clone(), fresher.clone()],
      None,
      30,
      now(),
    );
    assert_eq!(all, vec![quiet.clone(), fresher.clone(), fresh.clone()]);

    let removed_only =
      history_view(vec![quiet, stale, fresh.clone(), fresher], Some(EntityStatus::Removed), 30, now());
    assert_eq!(removed_only, vec![fresh]);
  }
}
