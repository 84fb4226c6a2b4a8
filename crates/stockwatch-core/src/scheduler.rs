//! Periodic removed-product tracking.
//!
//! A tracking cycle re-checks every known product with a cheap existence
//! request and feeds the result to the status history. Cycles never overlap;
//! [`Scheduler::run_scheduled`] keeps running them at the configured interval
//! for as long as auto-tracking stays enabled.

use std::{
  collections::HashSet,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{
  Result,
  classify::Classifier,
  events::{Event, EventBus},
  fetch::{FetchMethod, Fetcher},
  history::StatusHistory,
  policy::tracking_batch_delay,
  product::ProductAttributes,
  settings::TrackingSettings,
  store::{Catalog, KvStore, Sources, keys},
};

/// Products checked concurrently per tracking batch.
pub const TRACKING_BATCH_SIZE: usize = 5;

/// When the next cycle should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
  Immediate,
  At(DateTime<Utc>),
}

impl NextRun {
  /// Time left until the run is due; zero if already due.
  pub fn wait_from(&self, now: DateTime<Utc>) -> std::time::Duration {
    match self {
      Self::Immediate => std::time::Duration::ZERO,
      Self::At(at) => (*at - now).to_std().unwrap_or_default(),
    }
  }
}

/// Decide when the next cycle runs. Without a previous run the first one
/// happens a minute from now.
pub fn plan_next_run(
  last_tracked: Option<DateTime<Utc>>,
  interval_hours: u32,
  now: DateTime<Utc>,
) -> NextRun {
  match last_tracked {
    None => NextRun::At(now + Duration::minutes(1)),
    Some(last) => {
      let due = last + Duration::hours(i64::from(interval_hours));
      if due <= now { NextRun::Immediate } else { NextRun::At(due) }
    }
  }
}

/// Persisted tracking state as loaded by [`Scheduler::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingState {
  pub settings:     TrackingSettings,
  pub last_tracked: Option<DateTime<Utc>>,
}

struct Inner<S, F> {
  catalog:    Catalog<S>,
  history:    StatusHistory<S>,
  fetcher:    F,
  classifier: Classifier,
  events:     EventBus,
  tracking:   AtomicBool,
}

/// Cloning yields another handle to the same scheduler.
pub struct Scheduler<S, F> {
  inner: Arc<Inner<S, F>>,
}

impl<S, F> Clone for Scheduler<S, F> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<S: KvStore, F: Fetcher> Scheduler<S, F> {
  pub fn new(
    catalog: Catalog<S>,
    fetcher: F,
    classifier: Classifier,
    events: EventBus,
  ) -> Self {
    let history = StatusHistory::new(catalog.clone(), events.clone());
    Self {
      inner: Arc::new(Inner {
        catalog,
        history,
        fetcher,
        classifier,
        events,
        tracking: AtomicBool::new(false),
      }),
    }
  }

  pub fn is_tracking(&self) -> bool { self.inner.tracking.load(Ordering::SeqCst) }

  /// Load the tracking settings and last run time, and make sure the history
  /// collection exists.
  pub async fn initialize(&self) -> Result<TrackingState> {
    self.inner.history.ensure_initialized().await?;
    let state = TrackingState {
      settings:     self.inner.catalog.tracking_settings().await?,
      last_tracked: self.last_tracked().await?,
    };
    info!(
      auto_tracking = state.settings.auto_tracking,
      interval_hours = state.settings.interval_hours,
      last_tracked = ?state.last_tracked,
      "tracking initialised"
    );
    Ok(state)
  }

  pub async fn last_tracked(&self) -> Result<Option<DateTime<Utc>>> {
    self.inner.catalog.get(keys::LAST_TRACKED).await
  }

  /// Run one tracking cycle. Returns `false` if a cycle is already running.
  pub async fn run_cycle(&self) -> bool {
    if self.inner.tracking.swap(true, Ordering::SeqCst) {
      debug!("tracking cycle already in progress");
      return false;
    }

    if let Err(e) = self.inner.cycle().await {
      warn!(error = %e, "tracking cycle failed");
    }

    let now = Utc::now();
    if let Err(e) = self.inner.catalog.set(keys::LAST_TRACKED, &now).await {
      warn!(error = %e, "failed to persist last tracked time");
    }
    self.inner.tracking.store(false, Ordering::SeqCst);
    self.inner.events.publish(Event::TrackingFinished);
    info!(last_tracked = %now, "tracking cycle finished");
    true
  }

  /// Run cycles on schedule until auto-tracking is switched off.
  ///
  /// Settings are re-read before every wait so changes made elsewhere take
  /// effect on the next cycle.
  pub async fn run_scheduled(&self) -> Result<()> {
    let mut state = self.initialize().await?;
    while state.settings.auto_tracking {
      let now = Utc::now();
      let next = plan_next_run(state.last_tracked, state.settings.interval_hours, now);
      let wait = next.wait_from(now);
      info!(?next, ?wait, "next tracking cycle scheduled");
      tokio::time::sleep(wait).await;

      self.run_cycle().await;

      state = TrackingState {
        settings:     self.inner.catalog.tracking_settings().await?,
        last_tracked: self.last_tracked().await?,
      };
    }
    info!("auto-tracking disabled; scheduler exiting");
    Ok(())
  }
}

impl<S: KvStore, F: Fetcher> Inner<S, F> {
  async fn cycle(&self) -> Result<()> {
    let products = trackable_products(&self.catalog.sources().await?);
    info!(count = products.len(), "tracking cycle started");
    self.events.publish(Event::TrackingStarted { products: products.len() });

    let batches: Vec<_> = products.chunks(TRACKING_BATCH_SIZE).collect();
    let total = batches.len();
    for (i, batch) in batches.into_iter().enumerate() {
      debug!(batch = i + 1, total, size = batch.len(), "tracking batch");
      join_all(batch.iter().map(|attrs| self.track_one(attrs))).await;

      if i + 1 < total {
        tokio::time::sleep(tracking_batch_delay()).await;
      }
    }
    Ok(())
  }

  async fn track_one(&self, attrs: &ProductAttributes) {
    let Some(url) = attrs.url.as_deref() else {
      return;
    };
    let outcome = self.fetcher.fetch(url, FetchMethod::Head).await;
    let status = self.classifier.classify_existence(url, &outcome);
    debug!(%url, status = status.as_ref(), "existence checked");
    if let Err(e) = self.history.merge_observation(attrs, status).await {
      warn!(%url, error = %e, "failed to merge tracking observation");
    }
  }
}

/// Everything a cycle re-checks: each history record with a URL, then each
/// out-of-stock entry whose key is not tracked yet.
pub fn trackable_products(sources: &Sources) -> Vec<ProductAttributes> {
  let mut keys_seen = HashSet::new();
  let mut out = Vec::new();

  for (key, record) in &sources.history {
    if record.url.as_deref().is_some_and(|u| !u.is_empty()) {
      keys_seen.insert(key.clone());
      out.push(ProductAttributes {
        url:          record.url.clone(),
        model:        record.model.clone(),
        product_name: record.product_name.clone(),
        extra:        record.extra.clone(),
      });
    }
  }

  for entry in &sources.out_of_stock {
    let attrs = entry.attributes();
    if attrs.url.as_deref().is_none_or(str::is_empty) {
      continue;
    }
    if let Some(key) = attrs.key().map(str::to_owned) {
      if keys_seen.insert(key) {
        out.push(attrs);
      }
    }
  }
  out
}
