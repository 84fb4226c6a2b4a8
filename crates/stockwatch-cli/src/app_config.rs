//! Process configuration: where the store lives, how to serve, and how pages
//! are fetched and classified.
//!
//! Read from `stockwatch.toml` (or `--config`) and `STOCKWATCH_*` environment
//! variables. Runtime settings such as pacing and the tracking interval are
//! not here; those are persisted in the store.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use stockwatch_core::classify::{
  Classifier, DEFAULT_OUT_OF_STOCK_KEYWORDS, DEFAULT_PRODUCT_PATH_MARKER,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub store_path:            PathBuf,
  pub host:                  String,
  pub port:                  u16,
  pub request_timeout_secs:  u64,
  /// Path fragment that marks a product detail page.
  pub product_path_marker:   String,
  pub out_of_stock_keywords: Vec<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      store_path:            PathBuf::from("~/.local/share/stockwatch/stockwatch.db"),
      host:                  "127.0.0.1".to_string(),
      port:                  8787,
      request_timeout_secs:  30,
      product_path_marker:   DEFAULT_PRODUCT_PATH_MARKER.to_string(),
      out_of_stock_keywords: DEFAULT_OUT_OF_STOCK_KEYWORDS
        .iter()
        .map(|k| (*k).to_string())
        .collect(),
    }
  }
}

impl AppConfig {
  /// Layer the optional file at `path` under `STOCKWATCH_*` variables.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("STOCKWATCH")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("out_of_stock_keywords"),
      )
      .build()
      .context("failed to read config file")?;

    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  pub fn classifier(&self) -> Classifier {
    Classifier::new(&self.out_of_stock_keywords, self.product_path_marker.as_str())
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
