//! Error types for `stockwatch-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The key-value backend failed; the boxed error is the backend's own.
  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("product has neither a url nor a model to key it by")]
  MissingKey,
}

impl Error {
  pub fn storage<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
