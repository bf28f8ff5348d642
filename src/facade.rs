//! The single entry point for API traffic.
//!
//! Reads go cache first, then the network, then the offline snapshot. Writes go
//! to the network when online and fall back to the outbox when the network is
//! unreachable or keeps failing transiently.

use chrono::Duration as ChronoDuration;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::{request_key, CacheManager, CacheResult, SnapshotBinding, SnapshotStore};
use crate::error::{Result, SyncError};
use crate::http::{self, ApiRequest, ApiResponse, HttpTransport};
use crate::network::NetworkStatusMonitor;
use crate::outbox::{NewAction, OutboxQueue, PendingAction};
use crate::retry::{self, RetryPolicy};

/// A cacheable read.
#[derive(Debug, Clone)]
pub struct ReadRequest {
  pub request: ApiRequest,
  /// Overrides the cache's default TTL
  pub ttl: Option<ChronoDuration>,
  /// Snapshot table this response refreshes and falls back to
  pub snapshot: Option<SnapshotBinding>,
}

impl ReadRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      request: ApiRequest::get(url),
      ttl: None,
      snapshot: None,
    }
  }

  pub fn with_ttl(mut self, ttl: ChronoDuration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn with_snapshot(mut self, binding: SnapshotBinding) -> Self {
    self.snapshot = Some(binding);
    self
  }

  pub fn cache_key(&self) -> String {
    request_key(&self.request.method, &self.request.url)
  }
}

/// A mutation that may be queued for later.
#[derive(Debug, Clone)]
pub struct WriteRequest {
  /// Short label used in logs and the outbox, e.g. `record_payment`
  pub kind: String,
  pub request: ApiRequest,
  /// URLs of cached reads made stale by this write
  pub invalidates: Vec<String>,
}

impl WriteRequest {
  pub fn new(kind: impl Into<String>, request: ApiRequest) -> Self {
    Self {
      kind: kind.into(),
      request,
      invalidates: Vec::new(),
    }
  }

  pub fn invalidating(mut self, url: impl Into<String>) -> Self {
    self.invalidates.push(url.into());
    self
  }

  fn cache_keys(&self) -> Vec<String> {
    self
      .invalidates
      .iter()
      .map(|url| request_key("GET", url))
      .collect()
  }
}

#[derive(Debug)]
pub enum WriteOutcome {
  /// The server accepted the write
  Completed(ApiResponse),
  /// The write was stored in the outbox and will be replayed
  Queued(PendingAction),
}

impl WriteOutcome {
  pub fn is_queued(&self) -> bool {
    matches!(self, WriteOutcome::Queued(_))
  }
}

/// Resilient HTTP client. Cheap to clone.
#[derive(Clone)]
pub struct ResilientClient {
  cache: Arc<CacheManager>,
  snapshots: Arc<SnapshotStore>,
  outbox: Arc<OutboxQueue>,
  transport: Arc<dyn HttpTransport>,
  monitor: Arc<NetworkStatusMonitor>,
  policy: RetryPolicy,
  outbox_max_retries: u32,
  /// Cache keys with a background refresh in flight
  refreshing: Arc<Mutex<HashSet<String>>>,
  /// Bumped on logout; responses fetched under an older value are not stored
  generation: Arc<AtomicU64>,
}

impl ResilientClient {
  pub fn new(
    cache: Arc<CacheManager>,
    snapshots: Arc<SnapshotStore>,
    outbox: Arc<OutboxQueue>,
    transport: Arc<dyn HttpTransport>,
    monitor: Arc<NetworkStatusMonitor>,
  ) -> Self {
    Self {
      cache,
      snapshots,
      outbox,
      transport,
      monitor,
      policy: RetryPolicy::default(),
      outbox_max_retries: 3,
      refreshing: Arc::new(Mutex::new(HashSet::new())),
      generation: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Replay attempts allowed for writes that end up in the outbox.
  pub fn with_outbox_max_retries(mut self, max_retries: u32) -> Self {
    self.outbox_max_retries = max_retries;
    self
  }

  pub fn is_online(&self) -> bool {
    self.monitor.is_online()
  }

  /// Stop reads already in flight from storing their responses. Called before
  /// local data is wiped.
  pub fn discard_in_flight(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
  }

  fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Read through the cache.
  ///
  /// A valid cache entry is returned immediately; when online a background
  /// refresh updates the cache for the next caller. Without a cache entry the
  /// network is tried, and if it is unreachable the last snapshot is used.
  pub async fn get<T: DeserializeOwned>(&self, read: ReadRequest) -> Result<CacheResult<T>> {
    let key = read.cache_key();

    match self.cache.get_entry::<Value>(&key).await {
      Ok(Some(entry)) => {
        let refreshing = self.is_online() && self.spawn_refresh(read);
        return Ok(CacheResult::from_cache(
          decode(entry.data)?,
          entry.stored_at,
          refreshing,
        ));
      }
      Ok(None) => {}
      Err(err) => warn!(url = %read.request.url, error = %err, "cache unavailable, reading from network"),
    }

    if !self.is_online() {
      debug!(url = %read.request.url, "offline, trying snapshot");
      return self.snapshot_or_unavailable(&read, key).await;
    }

    let generation = self.generation();
    let label = format!("GET {}", read.request.url);
    match retry::with_resilience(&self.policy, &label, || self.fetch(&read.request)).await {
      Ok(value) => {
        self.remember(&read, &key, &value, generation).await;
        Ok(CacheResult::from_network(decode(value)?))
      }
      Err(err) if err.is_retryable() => match self.snapshot(&read).await {
        Some(value) => {
          warn!(url = %read.request.url, error = %err, "network failed, serving snapshot");
          Ok(CacheResult::from_snapshot(decode(value)?))
        }
        None => Err(err),
      },
      Err(err) => Err(err),
    }
  }

  /// Send a mutation, queueing it when the network cannot take it now.
  pub async fn send(&self, write: WriteRequest) -> Result<WriteOutcome> {
    if !self.is_online() {
      debug!(kind = %write.kind, "offline, queueing write");
      let offline = SyncError::NetworkUnavailable("offline".into());
      return self.enqueue(write, offline).await;
    }

    let label = format!("{} {}", write.request.method, write.request.url);
    match retry::with_resilience(&self.policy, &label, || self.attempt(&write.request)).await {
      Ok(response) => {
        for key in write.cache_keys() {
          if let Err(err) = self.cache.invalidate(&key).await {
            warn!(key = %key, error = %err, "failed to invalidate cache after write");
          }
        }
        Ok(WriteOutcome::Completed(response))
      }
      Err(err) if err.is_retryable() => self.enqueue(write, err).await,
      Err(err) => Err(err),
    }
  }

  async fn enqueue(&self, write: WriteRequest, network_error: SyncError) -> Result<WriteOutcome> {
    let invalidates = write.cache_keys();
    let kind = write.kind.clone();
    let action = NewAction {
      kind: write.kind,
      request: write.request,
      max_retries: self.outbox_max_retries,
      invalidates,
    };

    match self.outbox.enqueue_tracked(action).await {
      Ok(pending) => {
        info!(action_id = %pending.action_id, kind = %kind, "write queued for sync");
        Ok(WriteOutcome::Queued(pending))
      }
      Err(err) => {
        warn!(kind = %kind, error = %err, "outbox unavailable, write not queued");
        Err(network_error)
      }
    }
  }

  async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse> {
    let timeout = self.monitor.quality().request_timeout();
    http::send_with_timeout(&*self.transport, request, timeout).await
  }

  async fn fetch(&self, request: &ApiRequest) -> Result<Value> {
    self.attempt(request).await?.json_value()
  }

  /// Cache a fresh response and refresh its snapshot. Failures only cost
  /// offline coverage, so they are logged.
  async fn remember(&self, read: &ReadRequest, key: &str, value: &Value, generation: u64) {
    if self.generation() != generation {
      debug!(url = %read.request.url, "local data was cleared, not storing response");
      return;
    }
    if let Err(err) = self.cache.set(key, value, read.ttl).await {
      warn!(url = %read.request.url, error = %err, "failed to cache response");
    }
    if let Some(binding) = &read.snapshot {
      if let Err(err) = self.snapshots.record(binding, value).await {
        warn!(url = %read.request.url, error = %err, "failed to update snapshot");
      }
    }
  }

  async fn snapshot(&self, read: &ReadRequest) -> Option<Value> {
    let binding = read.snapshot.as_ref()?;
    match self.snapshots.lookup(binding).await {
      Ok(value) => value,
      Err(err) => {
        warn!(url = %read.request.url, error = %err, "snapshot unavailable");
        None
      }
    }
  }

  async fn snapshot_or_unavailable<T: DeserializeOwned>(
    &self,
    read: &ReadRequest,
    key: String,
  ) -> Result<CacheResult<T>> {
    match self.snapshot(read).await {
      Some(value) => Ok(CacheResult::from_snapshot(decode(value)?)),
      None => Err(SyncError::Unavailable { key }),
    }
  }

  /// Start a background refresh for `read` unless one is already running.
  /// Returns `true` when a refresh is in flight for the key.
  fn spawn_refresh(&self, read: ReadRequest) -> bool {
    let key = read.cache_key();
    if !self.lock_refreshing().insert(key.clone()) {
      return true;
    }

    let client = self.clone();
    let generation = self.generation();
    tokio::spawn(async move {
      match client.fetch(&read.request).await {
        Ok(value) => client.remember(&read, &key, &value, generation).await,
        Err(err) => debug!(url = %read.request.url, error = %err, "background refresh failed"),
      }
      client.lock_refreshing().remove(&key);
    });
    true
  }

  fn lock_refreshing(&self) -> MutexGuard<'_, HashSet<String>> {
    self.refreshing.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| SyncError::Decode(e.to_string()))
}
