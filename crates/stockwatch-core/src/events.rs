//! Typed notifications published by the checker, the tracker, and the
//! scheduler.
//!
//! Publishers never hold references to their consumers: every event goes out
//! on a [`tokio::sync::broadcast`] channel and any number of subscribers (UI,
//! logger, test harness) can listen independently. Sending with no
//! subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::product::{CheckResult, ResultBuckets, ResultCounts, StatusTransition};

/// Snapshot of a check run's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
  pub total:      usize,
  pub current:    usize,
  /// Rounded percentage; 0 when `total` is 0.
  pub percentage: u8,
  pub results:    ResultCounts,
}

impl Progress {
  pub fn new(total: usize, current: usize, results: ResultCounts) -> Self {
    let percentage = if total == 0 {
      0
    } else {
      ((current.min(total) as f64 / total as f64) * 100.0).round() as u8
    };
    Self { total, current, percentage, results }
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
  Progress(Progress),
  UrlChecked(CheckResult),
  Completed(ResultBuckets),
  StatusChanged {
    key:        String,
    transition: StatusTransition,
  },
  TrackingStarted {
    products: usize,
  },
  TrackingFinished,
}

/// Cheap-to-clone publishing handle.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
  fn default() -> Self { Self::new(256) }
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Event> { self.tx.subscribe() }

  pub fn publish(&self, event: Event) {
    // Err only means nobody is listening.
    let _ = self.tx.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percentage_guards_empty_total() {
    assert_eq!(Progress::new(0, 0, ResultCounts::default()).percentage, 0);
  }

  #[test]
  fn percentage_rounds() {
    assert_eq!(Progress::new(3, 1, ResultCounts::default()).percentage, 33);
    assert_eq!(Progress::new(3, 2, ResultCounts::default()).percentage, 67);
    assert_eq!(Progress::new(3, 3, ResultCounts::default()).percentage, 100);
  }

  #[tokio::test]
  async fn subscribers_receive_published_events() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    bus.publish(Event::TrackingFinished);
    assert!(matches!(rx.recv().await.unwrap(), Event::TrackingFinished));
  }

  #[test]
  fn publishing_without_subscribers_is_fine() {
    EventBus::default().publish(Event::TrackingFinished);
  }
}
