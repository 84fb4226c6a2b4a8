//! [`SqliteStore`] is the SQLite implementation of [`KvStore`].

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension as _;
use serde_json::{Map, Value};
use stockwatch_core::store::KvStore;
use tracing::debug;

use crate::{Error, Result, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A stockwatch key-value store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Every key currently stored, sorted.
  pub async fn keys(&self) -> Result<Vec<String>> {
    let keys = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt
          .query_map([], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(keys)
  }
}

// ─── KvStore impl ────────────────────────────────────────────────────────────

impl KvStore for SqliteStore {
  type Error = Error;

  async fn get<'a>(&'a self, keys: &'a [&'a str]) -> Result<Map<String, Value>> {
    let owned: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();

    let raw: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare("SELECT value_json FROM kv WHERE key = ?1")?;
        let mut found = Vec::with_capacity(owned.len());
        for key in owned {
          let value: Option<String> = stmt
            .query_row(rusqlite::params![key], |row| row.get(0))
            .optional()?;
          if let Some(value) = value {
            found.push((key, value));
          }
        }
        Ok(found)
      })
      .await?;

    raw
      .into_iter()
      .map(|(key, json)| match serde_json::from_str(&json) {
        Ok(value) => Ok((key, value)),
        Err(source) => Err(Error::Json { key, source }),
      })
      .collect()
  }

  async fn set(&self, items: Map<String, Value>) -> Result<()> {
    if items.is_empty() {
      return Ok(());
    }
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let rows: Vec<(String, String)> = items
      .into_iter()
      .map(|(k, v)| (k, v.to_string()))
      .collect();
    let count = rows.len();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO kv (key, value_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value_json = excluded.value_json,
               updated_at = excluded.updated_at",
          )?;
          for (key, json) in &rows {
            stmt.execute(rusqlite::params![key, json, now])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    debug!(count, "stored keys");
    Ok(())
  }

  async fn remove<'a>(&'a self, keys: &'a [&'a str]) -> Result<()> {
    let owned: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare("DELETE FROM kv WHERE key = ?1")?;
          for key in &owned {
            stmt.execute(rusqlite::params![key])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
