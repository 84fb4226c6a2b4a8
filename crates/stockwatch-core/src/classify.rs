//! Mapping HTTP outcomes to product states.
//!
//! Rules are checked in order and the first match wins:
//!
//! 1. no response → `error` (retryable)
//! 2. 404 → `removed`
//! 3. 2xx → out-of-stock keyword scan of the body
//! 4. redirected → `inStock` if it landed on a different product page,
//!    otherwise `removed`
//! 5. anything else → `error` (not retried)

use crate::{
  fetch::FetchOutcome,
  product::{EntityStatus, StatusKind},
};

/// Phrases that mark a product page as out of stock (matched
/// case-insensitively as substrings).
pub const DEFAULT_OUT_OF_STOCK_KEYWORDS: [&str; 7] = [
  "품절",
  "재고 없음",
  "현재 재고 없음",
  "일시 품절",
  "out of stock",
  "sold out",
  "currently unavailable",
];

/// Path fragment present on every product detail page.
pub const DEFAULT_PRODUCT_PATH_MARKER: &str = "/products/";

/// The classifier's verdict for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
  pub kind:          StatusKind,
  pub error_message: Option<String>,
  /// Only transport failures are worth retrying.
  pub retryable:     bool,
}

impl Classification {
  fn terminal(kind: StatusKind) -> Self {
    Self { kind, error_message: None, retryable: false }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
  keywords:            Vec<String>,
  product_path_marker: String,
}

impl Default for Classifier {
  fn default() -> Self {
    Self::new(DEFAULT_OUT_OF_STOCK_KEYWORDS, DEFAULT_PRODUCT_PATH_MARKER)
  }
}

impl Classifier {
  pub fn new<I, K>(keywords: I, product_path_marker: impl Into<String>) -> Self
  where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
  {
    Self {
      keywords:            keywords
        .into_iter()
        .map(|k| k.as_ref().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect(),
      product_path_marker: product_path_marker.into(),
    }
  }

  /// Classify a full content fetch of `requested_url`.
  pub fn classify(&self, requested_url: &str, outcome: &FetchOutcome) -> Classification {
    let response = match outcome {
      Ok(r) => r,
      Err(e) => {
        return Classification {
          kind:          StatusKind::Error,
          error_message: Some(e.0.clone()),
          retryable:     true,
        };
      }
    };

    if response.status == 404 {
      return Classification::terminal(StatusKind::Removed);
    }

    if response.is_success() {
      // A missing or undecodable body reads as "not out of stock".
      let out_of_stock = response
        .body
        .as_deref()
        .is_some_and(|body| self.is_out_of_stock(body));
      return Classification::terminal(if out_of_stock {
        StatusKind::OutOfStock
      } else {
        StatusKind::InStock
      });
    }

    if response.redirected {
      return Classification::terminal(
        if self.is_alternate_product(requested_url, &response.final_url) {
          StatusKind::InStock
        } else {
          StatusKind::Removed
        },
      );
    }

    Classification {
      kind:          StatusKind::Error,
      error_message: Some(format!("HTTP error {}", response.status)),
      retryable:     false,
    }
  }

  /// Classify a lightweight existence check (HEAD) into a lifecycle state.
  pub fn classify_existence(
    &self,
    requested_url: &str,
    outcome: &FetchOutcome,
  ) -> EntityStatus {
    let Ok(response) = outcome else {
      return EntityStatus::Unknown;
    };
    if response.is_success() {
      EntityStatus::Active
    } else if response.status == 404 {
      EntityStatus::Removed
    } else if response.redirected {
      if self.is_alternate_product(requested_url, &response.final_url) {
        EntityStatus::Active
      } else {
        EntityStatus::Removed
      }
    } else {
      EntityStatus::Unknown
    }
  }

  /// Case-insensitive keyword scan over the page text.
  pub fn is_out_of_stock(&self, body: &str) -> bool {
    let text = body.to_lowercase();
    self.keywords.iter().any(|k| text.contains(k.as_str()))
  }

  fn is_alternate_product(&self, requested_url: &str, final_url: &str) -> bool {
    final_url.contains(&self.product_path_marker) && final_url != requested_url
  }
}
