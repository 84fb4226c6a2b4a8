//! The `KvStore` trait, the storage keys, and a typed view over them.
//!
//! The persisted state is a flat map of keys to JSON blobs. Backends (e.g.
//! `stockwatch-store-sqlite`) implement [`KvStore`]; everything above it goes
//! through [`Catalog`], which owns the key names and the (de)serialisation.

use std::{
  collections::{BTreeMap, HashMap},
  convert::Infallible,
  future::Future,
  sync::{Arc, Mutex, PoisonError},
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::{
  Error, Result,
  product::{CatalogProduct, OutOfStockEntry, ProductRecord},
};

// ─── Keys ────────────────────────────────────────────────────────────────────

pub mod keys {
  pub const PRODUCTS: &str = "products";
  pub const OUT_OF_STOCK_PRODUCTS: &str = "outOfStockProducts";
  pub const PRODUCT_HISTORY: &str = "productHistory";
  pub const URL_CHECKER_SETTINGS: &str = "urlCheckerSettings";
  pub const AUTO_TRACKING: &str = "autoTracking";
  pub const TRACKING_INTERVAL: &str = "trackingInterval";
  pub const PERIOD_DAYS: &str = "periodDays";
  pub const LAST_TRACKED: &str = "lastTracked";
}

/// `productHistory`: record key (`url` or `model`) → record.
pub type ProductHistory = BTreeMap<String, ProductRecord>;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a key-value blob store.
///
/// `get` returns only the keys that exist; `set` upserts every entry of the
/// map it is given. There is no locking: concurrent writers race and the last
/// write wins.
pub trait KvStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch the values stored under `keys`. Missing keys are absent from the
  /// returned map.
  fn get<'a>(
    &'a self,
    keys: &'a [&'a str],
  ) -> impl Future<Output = Result<Map<String, Value>, Self::Error>> + Send + 'a;

  /// Upsert every entry in `items`.
  fn set(
    &self,
    items: Map<String, Value>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Delete the values stored under `keys`. Missing keys are ignored.
  fn remove<'a>(
    &'a self,
    keys: &'a [&'a str],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── In-memory backend ───────────────────────────────────────────────────────

/// A [`KvStore`] held entirely in memory. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl KvStore for MemoryStore {
  type Error = Infallible;

  async fn get<'a>(&'a self, keys: &'a [&'a str]) -> Result<Map<String, Value>, Infallible> {
    let map = self.lock();
    Ok(
      keys
        .iter()
        .filter_map(|k| map.get(*k).map(|v| ((*k).to_owned(), v.clone())))
        .collect(),
    )
  }

  async fn set(&self, items: Map<String, Value>) -> Result<(), Infallible> {
    self.lock().extend(items);
    Ok(())
  }

  async fn remove<'a>(&'a self, keys: &'a [&'a str]) -> Result<(), Infallible> {
    let mut map = self.lock();
    for k in keys {
      map.remove(*k);
    }
    Ok(())
  }
}

// ─── Typed view ──────────────────────────────────────────────────────────────

/// The three collections URLs are discovered from, read in one round trip.
#[derive(Debug, Clone, Default)]
pub struct Sources {
  pub products:     Vec<CatalogProduct>,
  pub out_of_stock: Vec<OutOfStockEntry>,
  pub history:      ProductHistory,
}

/// Typed access to the well-known keys of a [`KvStore`].
///
/// Cloning is cheap; the store is reference-counted.
///
/// Collections are whole JSON blobs, so updating one entry is a read, a
/// modification, and a write of the entire blob. Such updates must run under
/// [`Catalog::lock_writes`]; every clone shares the same lock. Two catalogs
/// built separately over one store do not.
pub struct Catalog<S> {
  store:  Arc<S>,
  writes: Arc<AsyncMutex<()>>,
}

impl<S> Clone for Catalog<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), writes: Arc::clone(&self.writes) }
  }
}

impl<S: KvStore> Catalog<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store, writes: Arc::default() } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Hold while reading, modifying and writing back a collection.
  pub async fn lock_writes(&self) -> AsyncMutexGuard<'_, ()> { self.writes.lock().await }

  /// Read a single key, decoding it as `T`. A JSON `null` counts as absent.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let mut map = self.store.get(&[key]).await.map_err(Error::storage)?;
    match map.remove(key) {
      None | Some(Value::Null) => Ok(None),
      Some(v) => Ok(Some(serde_json::from_value(v)?)),
    }
  }

  pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let mut items = Map::new();
    items.insert(key.to_owned(), serde_json::to_value(value)?);
    self.store.set(items).await.map_err(Error::storage)
  }

  pub async fn remove(&self, key: &str) -> Result<()> {
    self.store.remove(&[key]).await.map_err(Error::storage)
  }

  pub async fn sources(&self) -> Result<Sources> {
    let mut map = self
      .store
      .get(&[
        keys::PRODUCTS,
        keys::OUT_OF_STOCK_PRODUCTS,
        keys::PRODUCT_HISTORY,
      ])
      .await
      .map_err(Error::storage)?;

    Ok(Sources {
      products:     decode_or_default(map.remove(keys::PRODUCTS))?,
      out_of_stock: decode_or_default(map.remove(keys::OUT_OF_STOCK_PRODUCTS))?,
      history:      decode_or_default(map.remove(keys::PRODUCT_HISTORY))?,
    })
  }

  pub async fn products(&self) -> Result<Vec<CatalogProduct>> {
    Ok(self.get(keys::PRODUCTS).await?.unwrap_or_default())
  }

  pub async fn save_products(&self, products: &[CatalogProduct]) -> Result<()> {
    self.set(keys::PRODUCTS, products).await
  }

  pub async fn out_of_stock(&self) -> Result<Vec<OutOfStockEntry>> {
    Ok(self.get(keys::OUT_OF_STOCK_PRODUCTS).await?.unwrap_or_default())
  }

  pub async fn save_out_of_stock(&self, entries: &[OutOfStockEntry]) -> Result<()> {
    self.set(keys::OUT_OF_STOCK_PRODUCTS, entries).await
  }

  pub async fn history(&self) -> Result<ProductHistory> {
    Ok(self.get(keys::PRODUCT_HISTORY).await?.unwrap_or_default())
  }

  pub async fn save_history(&self, history: &ProductHistory) -> Result<()> {
    self.set(keys::PRODUCT_HISTORY, history).await
  }
}

fn decode_or_default<T: DeserializeOwned + Default>(v: Option<Value>) -> Result<T> {
  match v {
    None | Some(Value::Null) => Ok(T::default()),
    Some(v) => Ok(serde_json::from_value(v)?),
  }
}
