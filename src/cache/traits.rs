//! Core types shared by the read path.

use chrono::{DateTime, Utc};

/// Result from a read, including data and metadata about where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Whether a background refresh was started for this key
  pub refreshing: bool,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
      refreshing: false,
    }
  }

  /// Create a new cache result from a valid cache entry.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, refreshing: bool) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
      refreshing,
    }
  }

  /// Create a new cache result from the last-known-good snapshot.
  pub fn from_snapshot(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Snapshot,
      cached_at: None,
      refreshing: false,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
      refreshing: self.refreshing,
    }
  }
}

/// Indicates where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Unexpired cache entry
  Cache,
  /// Offline mode - network unavailable, serving the entity snapshot
  Snapshot,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::Snapshot => write!(f, "offline snapshot"),
    }
  }
}
