//! Test doubles shared by the engine tests.

use std::{
  collections::{HashMap, VecDeque},
  convert::Infallible,
  sync::{Arc, Mutex, PoisonError},
};

use serde_json::{Map, Value};
use tokio::{sync::Semaphore, task::yield_now};

use crate::{
  fetch::{FetchMethod, FetchOutcome, Fetcher, HttpResponse, TransportError},
  store::{KvStore, MemoryStore},
};

pub fn ok(url: &str, body: &str) -> FetchOutcome {
  Ok(HttpResponse {
    status:     200,
    redirected: false,
    final_url:  url.to_owned(),
    body:       Some(body.to_owned()),
  })
}

pub fn status(url: &str, code: u16) -> FetchOutcome {
  Ok(HttpResponse {
    status:     code,
    redirected: false,
    final_url:  url.to_owned(),
    body:       None,
  })
}

/// A redirect chain that ended on a non-success page.
pub fn redirect(to: &str) -> FetchOutcome {
  Ok(HttpResponse {
    status:     302,
    redirected: true,
    final_url:  to.to_owned(),
    body:       None,
  })
}

pub fn network_error() -> FetchOutcome { Err(TransportError("connection reset".into())) }

/// A [`Fetcher`] that replays scripted outcomes per URL.
///
/// Each URL's queue is consumed front to back and its last outcome repeats
/// forever. Unscripted URLs answer `200` with an empty body. With a gate set,
/// every fetch first waits for a permit.
#[derive(Default)]
pub struct ScriptedFetcher {
  scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
  calls:   Mutex<Vec<(String, FetchMethod)>>,
  gate:    Option<Arc<Semaphore>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self { Self::default() }

  pub fn script(self, url: &str, outcomes: impl IntoIterator<Item = FetchOutcome>) -> Self {
    self
      .scripts
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(url.to_owned(), outcomes.into_iter().collect());
    self
  }

  pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|(u, _)| u == url)
      .count()
  }

  pub fn methods(&self) -> Vec<FetchMethod> {
    self
      .calls
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(_, m)| *m)
      .collect()
  }

  fn next(&self, url: &str) -> FetchOutcome {
    let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
    match scripts.get_mut(url) {
      Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| ok(url, "")),
      Some(queue) => queue.front().cloned().unwrap_or_else(|| ok(url, "")),
      None => ok(url, ""),
    }
  }
}

impl Fetcher for ScriptedFetcher {
  async fn fetch<'a>(&'a self, url: &'a str, method: FetchMethod) -> FetchOutcome {
    if let Some(gate) = &self.gate {
      if let Ok(permit) = gate.acquire().await {
        permit.forget();
      }
    }
    self
      .calls
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push((url.to_owned(), method));
    self.next(url)
  }
}

/// A [`MemoryStore`] that suspends around every access, so concurrent
/// read-modify-write sequences interleave the way they do on a real backend.
#[derive(Clone, Default)]
pub struct YieldingStore(pub MemoryStore);

impl KvStore for YieldingStore {
  type Error = Infallible;

  async fn get<'a>(&'a self, keys: &'a [&'a str]) -> Result<Map<String, Value>, Infallible> {
    yield_now().await;
    let values = self.0.get(keys).await;
    yield_now().await;
    values
  }

  async fn set(&self, items: Map<String, Value>) -> Result<(), Infallible> {
    yield_now().await;
    self.0.set(items).await?;
    yield_now().await;
    Ok(())
  }

  async fn remove<'a>(&'a self, keys: &'a [&'a str]) -> Result<(), Infallible> {
    yield_now().await;
    self.0.remove(keys).await
  }
}
