//! Durable, ordered queue of mutations waiting to reach the backend.
//!
//! Actions are ordered by a logical `sequence`. A transient replay failure
//! moves the action to the tail (a fresh sequence) so one stuck mutation
//! cannot block everything queued behind it; callers must not depend on
//! strict ordering across distinct entities.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::http::{ApiRequest, ApiResponse};
use crate::store::{tables, PersistentStore, StoreExt};

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxAction {
  pub id: String,
  /// Free-form label, e.g. "record_payment"
  pub kind: String,
  pub target_url: String,
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
  pub max_retries: u32,
  /// Logical queue position; lowest goes first
  pub sequence: u64,
  pub last_attempt_at: Option<DateTime<Utc>>,
  /// Cache keys to drop once the mutation lands
  #[serde(default)]
  pub invalidates: Vec<String>,
}

impl OutboxAction {
  /// The request to replay, exactly as captured at enqueue time.
  pub fn request(&self) -> ApiRequest {
    ApiRequest {
      method: self.method.clone(),
      url: self.target_url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
    now - self.enqueued_at
  }
}

/// What a caller hands to [`OutboxQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct NewAction {
  pub kind: String,
  pub request: ApiRequest,
  pub max_retries: u32,
  pub invalidates: Vec<String>,
}

/// Handle for a caller waiting on a queued mutation.
#[derive(Debug)]
pub struct PendingAction {
  pub action_id: String,
  completion: oneshot::Receiver<Result<ApiResponse>>,
}

impl PendingAction {
  /// Wait for the replay outcome. Resolves with `Abandoned` if the queue
  /// stops tracking the action without an outcome.
  pub async fn wait(self) -> Result<ApiResponse> {
    let action_id = self.action_id;
    self
      .completion
      .await
      .unwrap_or(Err(SyncError::Abandoned { action_id }))
  }
}

type Waiter = oneshot::Sender<Result<ApiResponse>>;

/// Outbox on top of the persistent store.
pub struct OutboxQueue {
  store: Arc<dyn PersistentStore>,
  clock: Arc<dyn Clock>,
  /// Last sequence handed out; loaded lazily from the store
  sequence: tokio::sync::Mutex<Option<u64>>,
  /// Callers in this process waiting for an outcome
  waiters: Mutex<HashMap<String, Waiter>>,
}

impl OutboxQueue {
  pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      sequence: tokio::sync::Mutex::new(None),
      waiters: Mutex::new(HashMap::new()),
    }
  }

  /// Append an action. Returns the generated id.
  pub async fn enqueue(&self, action: NewAction) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    self.insert(id.clone(), action).await?;
    Ok(id)
  }

  /// Append an action and register a waiter for its outcome.
  ///
  /// The waiter is registered before the action becomes visible, so a
  /// concurrent drain cannot complete it unobserved.
  pub async fn enqueue_tracked(&self, action: NewAction) -> Result<PendingAction> {
    let id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = oneshot::channel();
    self.lock_waiters().insert(id.clone(), tx);

    if let Err(err) = self.insert(id.clone(), action).await {
      self.lock_waiters().remove(&id);
      return Err(err);
    }

    Ok(PendingAction {
      action_id: id,
      completion: rx,
    })
  }

  async fn insert(&self, id: String, action: NewAction) -> Result<()> {
    let NewAction {
      kind,
      request,
      max_retries,
      invalidates,
    } = action;

    let mut sequence = self.sequence.lock().await;
    let next = self.next_sequence(&mut sequence).await?;

    let action = OutboxAction {
      id,
      kind,
      target_url: request.url,
      method: request.method,
      headers: request.headers,
      body: request.body,
      enqueued_at: self.clock.now(),
      retry_count: 0,
      max_retries,
      sequence: next,
      last_attempt_at: None,
      invalidates,
    };

    self.store.put_json(tables::OUTBOX, &action.id, &action).await?;
    *sequence = Some(next);
    debug!(action_id = %action.id, kind = %action.kind, sequence = next, "action enqueued");
    Ok(())
  }

  async fn next_sequence(&self, current: &mut Option<u64>) -> Result<u64> {
    let last = match *current {
      Some(last) => last,
      None => {
        let last = self
          .load()
          .await?
          .iter()
          .map(|a| a.sequence)
          .max()
          .unwrap_or(0);
        *current = Some(last);
        last
      }
    };
    Ok(last + 1)
  }

  async fn load(&self) -> Result<Vec<OutboxAction>> {
    self.store.get_all_json(tables::OUTBOX).await
  }

  /// All queued actions in replay order.
  pub async fn list(&self) -> Result<Vec<OutboxAction>> {
    let mut actions = self.load().await?;
    actions.sort_by(|a, b| {
      a.sequence
        .cmp(&b.sequence)
        .then(a.enqueued_at.cmp(&b.enqueued_at))
    });
    Ok(actions)
  }

  pub async fn len(&self) -> Result<usize> {
    Ok(self.load().await?.len())
  }

  pub async fn is_empty(&self) -> Result<bool> {
    Ok(self.len().await? == 0)
  }

  pub async fn peek_oldest(&self) -> Result<Option<OutboxAction>> {
    Ok(self.list().await?.into_iter().next())
  }

  pub async fn remove(&self, action_id: &str) -> Result<()> {
    self.store.delete(tables::OUTBOX, action_id).await
  }

  /// Count one more failed attempt and move the action to the tail.
  pub async fn requeue_with_increment(&self, action_id: &str) -> Result<Option<OutboxAction>> {
    let mut sequence = self.sequence.lock().await;

    let Some(mut action) = self
      .store
      .get_json::<OutboxAction>(tables::OUTBOX, action_id)
      .await?
    else {
      return Ok(None);
    };

    let next = self.next_sequence(&mut sequence).await?;
    action.retry_count += 1;
    action.last_attempt_at = Some(self.clock.now());
    action.sequence = next;

    self.store.put_json(tables::OUTBOX, &action.id, &action).await?;
    *sequence = Some(next);
    debug!(action_id, retry_count = action.retry_count, "action moved to tail");
    Ok(Some(action))
  }

  /// Remove and return every action older than `max_age`.
  pub async fn evict_expired(&self, max_age: Duration) -> Result<Vec<OutboxAction>> {
    let now = self.clock.now();
    let mut evicted = Vec::new();

    for action in self.list().await? {
      if action.age_at(now) > max_age {
        self.remove(&action.id).await?;
        evicted.push(action);
      }
    }

    Ok(evicted)
  }

  /// Deliver an outcome to the caller waiting on `action_id`, if any.
  pub fn complete(&self, action_id: &str, outcome: Result<ApiResponse>) -> bool {
    match self.lock_waiters().remove(action_id) {
      Some(tx) => tx.send(outcome).is_ok(),
      None => false,
    }
  }

  /// Drop every waiter; pending callers resolve with `Abandoned`.
  pub fn abandon_waiters(&self) -> usize {
    let mut waiters = self.lock_waiters();
    let count = waiters.len();
    waiters.clear();
    count
  }

  fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<String, Waiter>> {
    self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
