//! The URL checker engine.
//!
//! A run walks the URL list in fixed-size batches. Checks inside a batch run
//! concurrently; batches are separated by a randomised pause. Every URL ends
//! in exactly one [`CheckResult`], and individual failures never abort the
//! run. [`UrlChecker::stop`] is cooperative: in-flight fetches finish, pending
//! retries are given up, no further batch starts, and no completion event
//! fires. Results of a run replaced by a newer one are discarded.

use std::{
  collections::HashSet,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  Result,
  classify::Classifier,
  events::{Event, EventBus, Progress},
  fetch::{FetchMethod, Fetcher},
  history::StatusHistory,
  policy::{RetryPolicy, random_delay},
  product::{
    CheckResult, OutOfStockEntry, ResultBuckets, SourceType, StatusKind, TrackedUrl,
  },
  settings::{CheckerSettings, CheckerSettingsUpdate, SourceFilter},
  store::{Catalog, KvStore, Sources},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
  #[default]
  Idle,
  Running,
  Completed,
}

/// A point-in-time view of the engine, for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerStatus {
  pub phase:    Phase,
  pub running:  bool,
  pub progress: Progress,
  pub settings: CheckerSettings,
}

#[derive(Default)]
struct RunState {
  urls:          Vec<TrackedUrl>,
  current_index: usize,
  results:       ResultBuckets,
  settings:      CheckerSettings,
  phase:         Phase,
  /// Bumped on every start so a stopped loop cannot resume after a restart.
  generation:    u64,
}

struct Inner<S, F> {
  catalog:    Catalog<S>,
  history:    StatusHistory<S>,
  fetcher:    F,
  classifier: Classifier,
  events:     EventBus,
  running:    AtomicBool,
  state:      Mutex<RunState>,
}

/// Cloning yields another handle to the same engine.
pub struct UrlChecker<S, F> {
  inner: Arc<Inner<S, F>>,
}

impl<S, F> Clone for UrlChecker<S, F> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<S: KvStore, F: Fetcher> UrlChecker<S, F> {
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
        running: AtomicBool::new(false),
        state: Mutex::new(RunState::default()),
      }),
    }
  }

  pub fn events(&self) -> &EventBus { &self.inner.events }

  pub fn history(&self) -> &StatusHistory<S> { &self.inner.history }

  /// Load the URL list from storage, keeping only the collections `filter`
  /// selects. Resets results and the cursor.
  ///
  /// Returns the number of URLs loaded. A storage failure is logged and
  /// yields 0. Ignored while a run is in progress.
  pub async fn initialize(&self, filter: SourceFilter) -> usize {
    if self.is_running() {
      warn!("initialize ignored while a check run is in progress");
      return self.inner.lock().urls.len();
    }

    let urls = match self.inner.catalog.sources().await {
      Ok(sources) => collect_urls(&sources, filter),
      Err(e) => {
        warn!(error = %e, "failed to load URL sources");
        Vec::new()
      }
    };

    let mut state = self.inner.lock();
    state.urls = urls;
    state.current_index = 0;
    state.results = ResultBuckets::default();
    state.phase = Phase::Idle;
    info!(count = state.urls.len(), filter = filter.as_ref(), "loaded URL list");
    state.urls.len()
  }

  /// Run the whole list to completion (or until stopped).
  ///
  /// Returns `false` without side effects if a run is already in progress or
  /// the list is empty.
  pub async fn start(&self) -> bool {
    let Some(generation) = self.inner.begin() else {
      return false;
    };
    self.inner.run(generation).await;
    true
  }

  /// Like [`start`](Self::start), but the run proceeds on a background task.
  pub fn spawn(&self) -> bool
  where
    S: 'static,
    F: 'static,
  {
    let Some(generation) = self.inner.begin() else {
      return false;
    };
    let inner = Arc::clone(&self.inner);
    tokio::spawn(async move { inner.run(generation).await });
    true
  }

  /// Request a cooperative stop. Returns `false` if nothing was running.
  pub fn stop(&self) -> bool {
    if !self.inner.running.swap(false, Ordering::SeqCst) {
      return false;
    }
    let mut state = self.inner.lock();
    state.phase = Phase::Idle;
    info!(checked = state.results.len(), "check run stopped");
    true
  }

  /// Fetch and classify one URL with bounded retries, then record the result.
  pub async fn check_one(&self, entry: &TrackedUrl) -> CheckResult {
    let retry = RetryPolicy::new(self.inner.lock().settings.max_retries);
    self.inner.check_one(entry, retry).await
  }

  /// Merge a partial settings update; returns the effective settings.
  pub fn update_settings(&self, update: &CheckerSettingsUpdate) -> CheckerSettings {
    let mut state = self.inner.lock();
    state.settings.apply(update);
    state.settings
  }

  pub fn settings(&self) -> CheckerSettings { self.inner.lock().settings }

  pub fn results(&self) -> ResultBuckets { self.inner.lock().results.clone() }

  pub fn urls(&self) -> Vec<TrackedUrl> { self.inner.lock().urls.clone() }

  pub fn phase(&self) -> Phase { self.inner.lock().phase }

  pub fn is_running(&self) -> bool { self.inner.running.load(Ordering::SeqCst) }

  pub fn progress(&self) -> Progress { self.inner.progress() }

  pub fn status(&self) -> CheckerStatus {
    let state = self.inner.lock();
    CheckerStatus {
      phase:    state.phase,
      running:  self.is_running(),
      progress: Progress::new(state.urls.len(), state.current_index, state.results.counts()),
      settings: state.settings,
    }
  }
}

impl<S: KvStore, F: Fetcher> Inner<S, F> {
  fn lock(&self) -> MutexGuard<'_, RunState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn progress(&self) -> Progress {
    let state = self.lock();
    Progress::new(state.urls.len(), state.current_index, state.results.counts())
  }

  fn publish_progress(&self) { self.events.publish(Event::Progress(self.progress())); }

  fn is_current(&self, generation: u64) -> bool {
    self.running.load(Ordering::SeqCst) && self.lock().generation == generation
  }

  /// Transition to `Running` if allowed; returns the run's generation.
  fn begin(&self) -> Option<u64> {
    let mut state = self.lock();
    if state.urls.is_empty() {
      debug!("start refused: URL list is empty");
      return None;
    }
    if self
      .running
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("start refused: a run is already in progress");
      return None;
    }
    state.phase = Phase::Running;
    state.results = ResultBuckets::default();
    state.current_index = 0;
    state.generation += 1;
    Some(state.generation)
  }

  async fn run(&self, generation: u64) {
    let (total, settings) = {
      let state = self.lock();
      (state.urls.len(), state.settings)
    };
    info!(total, batch_size = settings.batch_size, "check run started");
    self.publish_progress();

    let retry = RetryPolicy::new(settings.max_retries);
    let batch_size = settings.batch_size.max(1);

    loop {
      if !self.is_current(generation) {
        return;
      }

      let batch: Vec<TrackedUrl> = {
        let state = self.lock();
        let start = state.current_index;
        if start >= state.urls.len() {
          break;
        }
        let end = (start + batch_size).min(state.urls.len());
        state.urls[start..end].to_vec()
      };

      join_all(batch.iter().map(|entry| async move {
        if self.is_current(generation) {
          self.run_check(entry, retry, generation).await;
        }
      }))
      .await;

      let remaining = {
        let mut state = self.lock();
        if state.generation != generation {
          return;
        }
        state.current_index += batch.len();
        state.current_index < state.urls.len()
      };
      self.publish_progress();

      if remaining && self.is_current(generation) {
        let pause = random_delay(settings.delay_min, settings.delay_max);
        debug!(?pause, "waiting before next batch");
        tokio::time::sleep(pause).await;
      }
    }

    if self.is_current(generation) {
      self.complete();
    }
  }

  fn complete(&self) {
    let results = {
      let mut state = self.lock();
      state.phase = Phase::Completed;
      state.results.clone()
    };
    self.running.store(false, Ordering::SeqCst);
    let counts = results.counts();
    info!(
      in_stock = counts.in_stock,
      out_of_stock = counts.out_of_stock,
      removed = counts.removed,
      error = counts.error,
      "check run completed"
    );
    self.events.publish(Event::Completed(results));
  }

  /// Check one URL of run `generation`. Nothing is recorded if the run was
  /// stopped during a retry or replaced by a newer one.
  async fn run_check(&self, entry: &TrackedUrl, retry: RetryPolicy, generation: u64) {
    let (result, abandoned) = self
      .fetch_result(entry, retry, || self.is_current(generation))
      .await;
    if abandoned {
      debug!(url = %entry.url, "retry abandoned after stop");
      return;
    }
    self.record(entry, &result, Some(generation)).await;
  }

  async fn check_one(&self, entry: &TrackedUrl, retry: RetryPolicy) -> CheckResult {
    let (result, _) = self.fetch_result(entry, retry, || true).await;
    self.record(entry, &result, None).await;
    result
  }

  /// Fetch and classify with bounded retries. `proceed` is consulted around
  /// every backoff; the flag is set when it refused and the retry was given up.
  async fn fetch_result(
    &self,
    entry: &TrackedUrl,
    retry: RetryPolicy,
    proceed: impl Fn() -> bool,
  ) -> (CheckResult, bool) {
    let mut attempt = 0;
    let mut abandoned = false;
    let classification = loop {
      let outcome = self.fetcher.fetch(&entry.url, FetchMethod::Get).await;
      let classification = self.classifier.classify(&entry.url, &outcome);
      if classification.retryable && retry.should_retry(attempt) {
        let wait = retry.backoff(attempt);
        debug!(
          url = %entry.url,
          attempt,
          error = classification.error_message.as_deref().unwrap_or_default(),
          ?wait,
          "retrying"
        );
        if !proceed() {
          abandoned = true;
          break classification;
        }
        tokio::time::sleep(wait).await;
        if !proceed() {
          abandoned = true;
          break classification;
        }
        attempt += 1;
        continue;
      }
      break classification;
    };

    debug!(url = %entry.url, status = classification.kind.as_ref(), attempts = attempt + 1, "checked");
    let result = CheckResult {
      url:           entry.url.clone(),
      model:         entry.model.clone(),
      product_name:  entry.product_name.clone(),
      source_type:   entry.source_type,
      checked_at:    Utc::now(),
      status:        classification.kind,
      error_message: classification.error_message,
    };
    (result, abandoned)
  }

  /// Store `result` and apply its side effects. With a `generation`, the
  /// result is dropped unless that run is still the latest one.
  async fn record(&self, entry: &TrackedUrl, result: &CheckResult, generation: Option<u64>) {
    {
      let mut state = self.lock();
      if generation.is_some_and(|g| g != state.generation) {
        debug!(url = %result.url, "dropping result of a superseded run");
        return;
      }
      state.results.push(result.clone());
      self.events.publish(Event::UrlChecked(result.clone()));
    }

    if result.status == StatusKind::OutOfStock {
      if let Err(e) = self.upsert_out_of_stock(entry).await {
        warn!(url = %entry.url, error = %e, "failed to update out-of-stock list");
      }
    }

    if let Some(status) = result.status.observed_status() {
      if let Err(e) = self.history.merge_observation(&entry.attributes(), status).await {
        warn!(url = %entry.url, error = %e, "failed to merge observation into history");
      }
    }
  }

  async fn upsert_out_of_stock(&self, entry: &TrackedUrl) -> Result<()> {
    let _writes = self.catalog.lock_writes().await;
    let mut entries = self.catalog.out_of_stock().await?;
    upsert_out_of_stock(&mut entries, entry, Utc::now());
    self.catalog.save_out_of_stock(&entries).await
  }
}

/// Insert or refresh the out-of-stock entry for `entry.url`. Existing fields
/// are only overwritten by values the tracked URL actually carries.
pub fn upsert_out_of_stock(
  entries: &mut Vec<OutOfStockEntry>,
  entry: &TrackedUrl,
  now: DateTime<Utc>,
) {
  match entries
    .iter_mut()
    .find(|e| e.url.as_deref() == Some(entry.url.as_str()))
  {
    Some(existing) => {
      if entry.model.is_some() {
        existing.model.clone_from(&entry.model);
      }
      if entry.product_name.is_some() {
        existing.product_name.clone_from(&entry.product_name);
      }
      existing.is_out_of_stock = true;
      existing.timestamp = Some(now);
    }
    None => entries.push(OutOfStockEntry {
      url: Some(entry.url.clone()),
      model: entry.model.clone(),
      product_name: entry.product_name.clone(),
      is_out_of_stock: true,
      timestamp: Some(now),
      ..OutOfStockEntry::default()
    }),
  }
}

/// Build the URL list from the selected collections: `products`, then
/// `outOfStockProducts`, then `productHistory`. The first occurrence of a URL
/// wins and insertion order is preserved.
pub fn collect_urls(sources: &Sources, filter: SourceFilter) -> Vec<TrackedUrl> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  let mut push = |url: Option<&String>,
                  model: &Option<String>,
                  product_name: &Option<String>,
                  source_type: SourceType| {
    let Some(url) = url.filter(|u| !u.is_empty()) else {
      return;
    };
    if seen.insert(url.clone()) {
      out.push(TrackedUrl {
        url: url.clone(),
        model: model.clone(),
        product_name: product_name.clone(),
        source_type,
      });
    }
  };

  if filter.includes_products() {
    for p in &sources.products {
      push(p.url.as_ref(), &p.model, &p.product_name, SourceType::Product);
    }
  }
  if filter.includes_out_of_stock() {
    for e in &sources.out_of_stock {
      push(e.url.as_ref(), &e.model, &e.product_name, SourceType::OutOfStock);
    }
  }
  if filter.includes_history() {
    for r in sources.history.values() {
      push(r.url.as_ref(), &r.model, &r.product_name, SourceType::History);
    }
  }
  out
}
