//! Runtime settings persisted in the key-value store.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::{
  Result,
  store::{Catalog, KvStore, keys},
};

/// Which stored collections a check run draws URLs from.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  AsRefStr,
  EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SourceFilter {
  #[default]
  All,
  Products,
  OutOfStock,
  History,
}

impl SourceFilter {
  pub fn includes_products(self) -> bool { matches!(self, Self::All | Self::Products) }

  pub fn includes_out_of_stock(self) -> bool { matches!(self, Self::All | Self::OutOfStock) }

  pub fn includes_history(self) -> bool { matches!(self, Self::All | Self::History) }
}

/// Pacing for the URL checker (`urlCheckerSettings`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckerSettings {
  pub url_source:  SourceFilter,
  /// Lower bound of the inter-batch pause, in whole seconds.
  pub delay_min:   u64,
  pub delay_max:   u64,
  pub max_retries: u32,
  /// URLs checked concurrently per batch. Kept at 1 so the site sees one
  /// request at a time.
  pub batch_size:  usize,
}

impl Default for CheckerSettings {
  fn default() -> Self {
    Self {
      url_source:  SourceFilter::All,
      delay_min:   2,
      delay_max:   5,
      max_retries: 2,
      batch_size:  1,
    }
  }
}

/// A partial update to [`CheckerSettings`]; absent fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerSettingsUpdate {
  pub url_source:  Option<SourceFilter>,
  pub delay_min:   Option<u64>,
  pub delay_max:   Option<u64>,
  pub max_retries: Option<u32>,
  pub batch_size:  Option<usize>,
}

impl CheckerSettings {
  pub fn apply(&mut self, update: &CheckerSettingsUpdate) {
    if let Some(v) = update.url_source {
      self.url_source = v;
    }
    if let Some(v) = update.delay_min {
      self.delay_min = v;
    }
    if let Some(v) = update.delay_max {
      self.delay_max = v;
    }
    if let Some(v) = update.max_retries {
      self.max_retries = v;
    }
    if let Some(v) = update.batch_size {
      self.batch_size = v.max(1);
    }
  }
}

impl From<CheckerSettings> for CheckerSettingsUpdate {
  fn from(s: CheckerSettings) -> Self {
    Self {
      url_source:  Some(s.url_source),
      delay_min:   Some(s.delay_min),
      delay_max:   Some(s.delay_max),
      max_retries: Some(s.max_retries),
      batch_size:  Some(s.batch_size),
    }
  }
}

/// Scheduled tracking configuration (`autoTracking`, `trackingInterval`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSettings {
  pub auto_tracking:  bool,
  pub interval_hours: u32,
}

impl Default for TrackingSettings {
  fn default() -> Self { Self { auto_tracking: true, interval_hours: 24 } }
}

/// Default window for the history view, in days (`periodDays`).
pub const DEFAULT_PERIOD_DAYS: u32 = 30;

impl<S: KvStore> Catalog<S> {
  pub async fn checker_settings(&self) -> Result<CheckerSettings> {
    Ok(self.get(keys::URL_CHECKER_SETTINGS).await?.unwrap_or_default())
  }

  pub async fn save_checker_settings(&self, settings: &CheckerSettings) -> Result<()> {
    self.set(keys::URL_CHECKER_SETTINGS, settings).await
  }

  pub async fn tracking_settings(&self) -> Result<TrackingSettings> {
    let defaults = TrackingSettings::default();
    Ok(TrackingSettings {
      auto_tracking:  self
        .get(keys::AUTO_TRACKING)
        .await?
        .unwrap_or(defaults.auto_tracking),
      interval_hours: self
        .get::<u32>(keys::TRACKING_INTERVAL)
        .await?
        .filter(|h| *h > 0)
        .unwrap_or(defaults.interval_hours),
    })
  }

  pub async fn save_tracking_settings(&self, settings: &TrackingSettings) -> Result<()> {
    self.set(keys::AUTO_TRACKING, &settings.auto_tracking).await?;
    self.set(keys::TRACKING_INTERVAL, &settings.interval_hours).await
  }

  pub async fn period_days(&self) -> Result<u32> {
    Ok(
      self
        .get::<u32>(keys::PERIOD_DAYS)
        .await?
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_PERIOD_DAYS),
    )
  }

  pub async fn save_period_days(&self, days: u32) -> Result<()> {
    self.set(keys::PERIOD_DAYS, &days).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use serde_json::json;

  use super::*;
  use crate::store::MemoryStore;

  #[test]
  fn partial_settings_json_fills_defaults() {
    let s: CheckerSettings =
      serde_json::from_value(json!({ "urlSource": "outOfStock", "delayMin": 3 })).unwrap();
    assert_eq!(s.url_source, SourceFilter::OutOfStock);
    assert_eq!(s.delay_min, 3);
    assert_eq!(s.delay_max, 5);
    assert_eq!(s.batch_size, 1);
  }

  #[test]
  fn update_keeps_absent_fields_and_clamps_batch_size() {
    let mut s = CheckerSettings::default();
    s.apply(&CheckerSettingsUpdate {
      max_retries: Some(4),
      batch_size: Some(0),
      ..CheckerSettingsUpdate::default()
    });
    assert_eq!(s.max_retries, 4);
    assert_eq!(s.batch_size, 1);
    assert_eq!(s.delay_min, 2);
  }

  #[test]
  fn source_filter_selection() {
    assert!(SourceFilter::All.includes_history());
    assert!(!SourceFilter::Products.includes_out_of_stock());
    assert_eq!("outOfStock".parse::<SourceFilter>().unwrap(), SourceFilter::OutOfStock);
  }

  #[tokio::test]
  async fn tracking_settings_default_and_roundtrip() {
    let catalog = Catalog::new(Arc::new(MemoryStore::new()));
    assert_eq!(catalog.tracking_settings().await.unwrap(), TrackingSettings::default());

    let custom = TrackingSettings { auto_tracking: false, interval_hours: 6 };
    catalog.save_tracking_settings(&custom).await.unwrap();
    assert_eq!(catalog.tracking_settings().await.unwrap(), custom);
  }

  #[tokio::test]
  async fn zero_interval_falls_back_to_default() {
    let catalog = Catalog::new(Arc::new(MemoryStore::new()));
    catalog.set(keys::TRACKING_INTERVAL, &0).await.unwrap();
    assert_eq!(catalog.tracking_settings().await.unwrap().interval_hours, 24);
    assert_eq!(catalog.period_days().await.unwrap(), DEFAULT_PERIOD_DAYS);
  }
}
