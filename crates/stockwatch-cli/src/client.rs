//! [`Fetcher`] over a shared [`reqwest::Client`].

use std::time::Duration;

use anyhow::{Context, Result};
use rand_core::{OsRng, RngCore};
use reqwest::{Client, Url, header};
use stockwatch_core::fetch::{FetchMethod, FetchOutcome, Fetcher, HttpResponse, TransportError};
use tracing::debug;

/// Browser user agents rotated per request.
pub const USER_AGENTS: [&str; 5] = [
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub fn random_user_agent() -> &'static str {
  USER_AGENTS[OsRng.next_u32() as usize % USER_AGENTS.len()]
}

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch<'a>(&'a self, url: &'a str, method: FetchMethod) -> FetchOutcome {
    let request = match method {
      FetchMethod::Get => self.client.get(url),
      FetchMethod::Head => self.client.head(url),
    };
    let response = request
      .header(header::USER_AGENT, random_user_agent())
      .header(header::CACHE_CONTROL, "no-store")
      .send()
      .await
      .map_err(|e| TransportError(e.to_string()))?;

    let status = response.status().as_u16();
    let redirected = Url::parse(url).is_ok_and(|requested| requested != *response.url());
    let final_url = response.url().to_string();
    debug!(url, status, redirected, %final_url, ?method, "fetched");

    let body = match method {
      FetchMethod::Get => Some(
        response
          .text()
          .await
          .map_err(|e| TransportError(format!("failed to read body: {e}")))?,
      ),
      FetchMethod::Head => None,
    };
    Ok(HttpResponse { status, redirected, final_url, body })
  }
}
