//! Durable table-oriented key-value storage.
//!
//! Everything the client keeps across restarts (read cache, entity snapshots,
//! the outbox) lives in one [`PersistentStore`]. Operations only complete once
//! the write is durable; any failure of the backing storage surfaces as
//! [`SyncError::StorageUnavailable`] so callers can fall back to network-only
//! behaviour.

mod sqlite;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, SyncError};

pub use sqlite::SqliteStore;

/// Well-known table names.
pub mod tables {
  pub const CACHE: &str = "cache";
  pub const OUTBOX: &str = "outbox_actions";
}

/// Trait for persistent storage backends.
#[async_trait]
pub trait PersistentStore: Send + Sync {
  async fn put(&self, table: &str, key: &str, value: Vec<u8>) -> Result<()>;

  async fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

  /// All values in a table, ordered by key.
  async fn get_all(&self, table: &str) -> Result<Vec<Vec<u8>>>;

  async fn delete(&self, table: &str, key: &str) -> Result<()>;

  /// Replace the entire contents of one table in a single transaction.
  async fn replace_table(&self, table: &str, entries: Vec<(String, Vec<u8>)>) -> Result<()>;

  /// Remove every record from every table. Callers never observe a partially
  /// cleared store.
  async fn clear_all(&self) -> Result<()>;
}

/// JSON helpers on top of the byte-level store.
#[async_trait]
pub trait StoreExt: PersistentStore {
  async fn put_json<T>(&self, table: &str, key: &str, value: &T) -> Result<()>
  where
    T: Serialize + Sync + ?Sized,
  {
    let bytes = serde_json::to_vec(value)
      .map_err(|e| SyncError::storage(&format!("failed to encode {}/{}", table, key), e))?;
    self.put(table, key, bytes).await
  }

  async fn get_json<T>(&self, table: &str, key: &str) -> Result<Option<T>>
  where
    T: DeserializeOwned + Send,
  {
    match self.get(table, key).await? {
      Some(bytes) => serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| SyncError::storage(&format!("failed to decode {}/{}", table, key), e)),
      None => Ok(None),
    }
  }

  async fn get_all_json<T>(&self, table: &str) -> Result<Vec<T>>
  where
    T: DeserializeOwned + Send,
  {
    self
      .get_all(table)
      .await?
      .iter()
      .map(|bytes| {
        serde_json::from_slice(bytes)
          .map_err(|e| SyncError::storage(&format!("failed to decode row in {}", table), e))
      })
      .collect()
  }
}

impl<S: PersistentStore + ?Sized> StoreExt for S {}

/// Store used when the database cannot be opened.
/// Every operation fails, which puts the client in network-only mode.
pub struct DisabledStore {
  reason: String,
}

impl DisabledStore {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  fn fail<T>(&self) -> Result<T> {
    Err(SyncError::StorageUnavailable(self.reason.clone()))
  }
}

#[async_trait]
impl PersistentStore for DisabledStore {
  async fn put(&self, _table: &str, _key: &str, _value: Vec<u8>) -> Result<()> {
    self.fail()
  }

  async fn get(&self, _table: &str, _key: &str) -> Result<Option<Vec<u8>>> {
    self.fail()
  }

  async fn get_all(&self, _table: &str) -> Result<Vec<Vec<u8>>> {
    self.fail()
  }

  async fn delete(&self, _table: &str, _key: &str) -> Result<()> {
    self.fail()
  }

  async fn replace_table(&self, _table: &str, _entries: Vec<(String, Vec<u8>)>) -> Result<()> {
    self.fail()
  }

  async fn clear_all(&self) -> Result<()> {
    self.fail()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_disabled_store_reports_storage_unavailable() {
    let store = DisabledStore::new("quota exceeded");
    let err = store.get("cache", "k").await.unwrap_err();
    assert_eq!(err, SyncError::StorageUnavailable("quota exceeded".into()));
    assert!(store.clear_all().await.is_err());
  }

  #[tokio::test]
  async fn test_json_helpers_through_trait_object() {
    let store: std::sync::Arc<dyn PersistentStore> =
      std::sync::Arc::new(SqliteStore::in_memory().unwrap());
    store
      .put_json("tenants", "t-1", &serde_json::json!({"id": "t-1", "name": "Ana"}))
      .await
      .unwrap();

    let value: Option<serde_json::Value> = store.get_json("tenants", "t-1").await.unwrap();
    assert_eq!(value.unwrap()["name"], "Ana");

    store.put("tenants", "broken", b"not json".to_vec()).await.unwrap();
    let err = store
      .get_all_json::<serde_json::Value>("tenants")
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::StorageUnavailable(_)));
  }
}
