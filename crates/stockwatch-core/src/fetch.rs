//! The `Fetcher` trait: the engine's only view of the network.

use std::future::Future;

use thiserror::Error;

/// Which request shape to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
  /// Full content fetch; the body is read for the out-of-stock text scan.
  Get,
  /// Existence check only; no body is read.
  Head,
}

/// What came back from the server, after following redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status:     u16,
  /// Whether at least one redirect was followed.
  pub redirected: bool,
  pub final_url:  String,
  /// `None` for HEAD requests.
  pub body:       Option<String>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
}

/// No complete response was received (DNS, connect, TLS, timeout, truncated
/// body, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("network error: {0}")]
pub struct TransportError(pub String);

/// The result of one fetch attempt.
pub type FetchOutcome = Result<HttpResponse, TransportError>;

/// Abstraction over the HTTP client. Implementations follow redirects and
/// report the final URL; they never turn an HTTP status into an error.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(
    &'a self,
    url: &'a str,
    method: FetchMethod,
  ) -> impl Future<Output = FetchOutcome> + Send + 'a;
}
