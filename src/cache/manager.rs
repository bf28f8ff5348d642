//! TTL-bounded read cache on top of the persistent store.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{tables, PersistentStore, StoreExt};

/// A cached value with its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub key: String,
  pub data: T,
  pub stored_at: DateTime<Utc>,
  /// `None` means the entry never expires
  pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.map_or(true, |expires_at| now < expires_at)
  }
}

/// Read cache. Concurrent writers to one key race to last-write-wins, which
/// is fine because every entry can be re-derived from the network.
pub struct CacheManager {
  store: Arc<dyn PersistentStore>,
  clock: Arc<dyn Clock>,
  /// TTL applied when `set` is called without one
  default_ttl: Duration,
}

impl CacheManager {
  pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      default_ttl: Duration::minutes(5),
    }
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Store `data` under `key`, expiring after `ttl` (or the default TTL).
  pub async fn set<T>(&self, key: &str, data: &T, ttl: Option<Duration>) -> Result<()>
  where
    T: Serialize + Sync,
  {
    let now = self.clock.now();
    let ttl = ttl.unwrap_or(self.default_ttl);
    self.write(key, data, now, Some(now + ttl)).await
  }

  /// Store `data` under `key` with no expiry.
  pub async fn set_without_expiry<T>(&self, key: &str, data: &T) -> Result<()>
  where
    T: Serialize + Sync,
  {
    self.write(key, data, self.clock.now(), None).await
  }

  async fn write<T>(
    &self,
    key: &str,
    data: &T,
    stored_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
  ) -> Result<()>
  where
    T: Serialize + Sync,
  {
    let entry = CacheEntry {
      key: key.to_string(),
      data,
      stored_at,
      expires_at,
    };
    self.store.put_json(tables::CACHE, key, &entry).await
  }

  /// Get the data for `key`, or `None` if missing or expired.
  pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
  where
    T: DeserializeOwned + Send,
  {
    Ok(self.get_entry(key).await?.map(|entry| entry.data))
  }

  /// Get the full entry for `key`. Expired or unreadable entries are deleted
  /// and reported as missing.
  pub async fn get_entry<T>(&self, key: &str) -> Result<Option<CacheEntry<T>>>
  where
    T: DeserializeOwned + Send,
  {
    let Some(bytes) = self.store.get(tables::CACHE, key).await? else {
      return Ok(None);
    };

    let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "dropping unreadable cache entry");
        self.invalidate(key).await?;
        return Ok(None);
      }
    };

    if !entry.is_valid_at(self.clock.now()) {
      debug!(key, "cache entry expired");
      self.invalidate(key).await?;
      return Ok(None);
    }

    Ok(Some(entry))
  }

  pub async fn invalidate(&self, key: &str) -> Result<()> {
    self.store.delete(tables::CACHE, key).await
  }
}

/// Stable cache key for a request: hex SHA-256 of `METHOD url`.
pub fn request_key(method: &str, url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.to_ascii_uppercase().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::SqliteStore;

  fn setup() -> (CacheManager, Arc<ManualClock>, Arc<dyn PersistentStore>) {
    let store: Arc<dyn PersistentStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let clock = Arc::new(ManualClock::default());
    let cache = CacheManager::new(Arc::clone(&store), clock.clone());
    (cache, clock, store)
  }

  #[tokio::test]
  async fn test_entry_is_served_until_ttl_elapses() {
    let (cache, clock, store) = setup();

    for ttl_secs in [1, 60, 3600] {
      let key = format!("prop-{}", ttl_secs);
      cache
        .set(&key, &"villa", Some(Duration::seconds(ttl_secs)))
        .await
        .unwrap();

      clock.advance(Duration::seconds(ttl_secs) - Duration::milliseconds(1));
      assert_eq!(cache.get::<String>(&key).await.unwrap().as_deref(), Some("villa"));

      clock.advance(Duration::milliseconds(1));
      assert_eq!(cache.get::<String>(&key).await.unwrap(), None);
      // The expired read removed the entry
      assert_eq!(store.get(tables::CACHE, &key).await.unwrap(), None);
    }
  }

  #[tokio::test]
  async fn test_default_ttl_applies_when_none_given() {
    let (cache, clock, _) = setup();
    let cache = cache.with_default_ttl(Duration::minutes(2));

    cache.set("k", &1u32, None).await.unwrap();
    clock.advance(Duration::minutes(1));
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(1));
    clock.advance(Duration::minutes(1));
    assert_eq!(cache.get::<u32>("k").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_entry_without_expiry_never_expires() {
    let (cache, clock, _) = setup();
    cache.set_without_expiry("k", &"forever").await.unwrap();
    clock.advance(Duration::days(365));
    assert!(cache.get::<String>("k").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_already_expired_entry_is_absent() {
    let (cache, clock, store) = setup();
    let entry = CacheEntry {
      key: "prop-1".to_string(),
      data: "stale",
      stored_at: clock.now() - Duration::minutes(10),
      expires_at: Some(clock.now() - Duration::milliseconds(1)),
    };
    store.put_json(tables::CACHE, "prop-1", &entry).await.unwrap();

    assert_eq!(cache.get::<String>("prop-1").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_invalidate_and_overwrite() {
    let (cache, _, _) = setup();
    cache.set("k", &"first", None).await.unwrap();
    cache.set("k", &"second", None).await.unwrap();
    assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("second"));

    cache.invalidate("k").await.unwrap();
    assert_eq!(cache.get::<String>("k").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_unreadable_entry_is_dropped() {
    let (cache, _, store) = setup();
    store.put(tables::CACHE, "k", b"{garbage".to_vec()).await.unwrap();
    assert_eq!(cache.get::<String>("k").await.unwrap(), None);
    assert_eq!(store.get(tables::CACHE, "k").await.unwrap(), None);
  }

  #[test]
  fn test_request_key_is_stable_and_method_sensitive() {
    let a = request_key("get", "https://api.test/properties");
    let b = request_key("GET", "https://api.test/properties");
    let c = request_key("POST", "https://api.test/properties");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
  }
}
