//! Replays the outbox when connectivity returns.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Draining → Idle
//! ```
//!
//! A drain stops early when the monitor reports offline or the coordinator is
//! halted; whatever has not been processed stays queued for the next drain.
//! Only one drain runs at a time and a trigger during a drain is a no-op: the
//! running drain re-peeks after every action and so picks up anything
//! enqueued meanwhile.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::http::{self, HttpTransport};
use crate::network::{NetworkEvent, NetworkStatusMonitor};
use crate::outbox::{OutboxAction, OutboxQueue};
use crate::retry::{self, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Draining,
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
  pub succeeded: usize,
  pub failed: usize,
  pub expired: usize,
  /// Actions still queued when the drain finished
  pub remaining: usize,
  /// The drain stopped before the queue was empty
  pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Queued actions older than this are evicted instead of replayed
  pub max_age: ChronoDuration,
  /// Paces re-attempts of requeued actions
  pub retry: RetryPolicy,
  /// How often to evict expired actions and retry a non-empty queue
  pub maintenance_interval: Duration,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      max_age: ChronoDuration::minutes(5),
      retry: RetryPolicy::default(),
      maintenance_interval: Duration::from_secs(60),
    }
  }
}

enum Step {
  Continue,
  Stop,
}

pub struct SyncCoordinator {
  outbox: Arc<OutboxQueue>,
  cache: Arc<CacheManager>,
  transport: Arc<dyn HttpTransport>,
  monitor: Arc<NetworkStatusMonitor>,
  clock: Arc<dyn Clock>,
  settings: SyncSettings,
  state: watch::Sender<SyncState>,
  halted: watch::Sender<bool>,
  summaries: broadcast::Sender<SyncSummary>,
}

impl SyncCoordinator {
  pub fn new(
    outbox: Arc<OutboxQueue>,
    cache: Arc<CacheManager>,
    transport: Arc<dyn HttpTransport>,
    monitor: Arc<NetworkStatusMonitor>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
  ) -> Self {
    let (state, _) = watch::channel(SyncState::Idle);
    let (halted, _) = watch::channel(false);
    let (summaries, _) = broadcast::channel(16);

    Self {
      outbox,
      cache,
      transport,
      monitor,
      clock,
      settings,
      state,
      halted,
      summaries,
    }
  }

  pub fn state(&self) -> SyncState {
    *self.state.borrow()
  }

  /// Receive a summary after every drain.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncSummary> {
    self.summaries.subscribe()
  }

  fn is_halted(&self) -> bool {
    *self.halted.borrow()
  }

  /// Drain the outbox. Returns `None` if a drain was already running or the
  /// coordinator is halted.
  pub async fn drain(&self) -> Option<SyncSummary> {
    let started = self.state.send_if_modified(|state| {
      if *state == SyncState::Draining || self.is_halted() {
        return false;
      }
      *state = SyncState::Draining;
      true
    });
    if !started {
      debug!("drain already running or halted; trigger ignored");
      return None;
    }

    info!("outbox drain started");
    let mut summary = SyncSummary::default();
    if let Err(err) = self.drain_queue(&mut summary).await {
      warn!(error = %err, "outbox drain stopped");
      summary.interrupted = true;
    }
    summary.remaining = self.outbox.len().await.unwrap_or(0);
    if summary.remaining > 0 {
      summary.interrupted = true;
    }

    self.state.send_replace(SyncState::Idle);
    info!(
      succeeded = summary.succeeded,
      failed = summary.failed,
      expired = summary.expired,
      remaining = summary.remaining,
      "outbox drain finished"
    );
    // No subscribers is fine
    let _ = self.summaries.send(summary);
    Some(summary)
  }

  async fn drain_queue(&self, summary: &mut SyncSummary) -> Result<()> {
    loop {
      if self.is_halted() || !self.monitor.is_online() {
        debug!("drain interrupted");
        return Ok(());
      }

      summary.expired += self.evict_expired().await?;

      let Some(action) = self.outbox.peek_oldest().await? else {
        return Ok(());
      };

      if !self.pace(&action).await {
        continue;
      }

      // The backoff wait may have carried the action past its max age
      if action.age_at(self.clock.now()) > self.settings.max_age {
        summary.expired += self.evict_expired().await?;
        continue;
      }

      match self.replay(action, summary).await? {
        Step::Continue => tokio::task::yield_now().await,
        Step::Stop => return Ok(()),
      }
    }
  }

  async fn replay(&self, action: OutboxAction, summary: &mut SyncSummary) -> Result<Step> {
    let timeout = self.monitor.quality().request_timeout();
    let request = action.request();
    let mut halted = self.halted.subscribe();
    let outcome = tokio::select! {
      outcome = http::send_with_timeout(&*self.transport, &request, timeout) => outcome,
      _ = halted.wait_for(|halted| *halted) => {
        // Abandon the in-flight request; the action stays queued untouched
        debug!(action_id = %action.id, "drain halted mid-request");
        return Ok(Step::Stop);
      }
    };

    match outcome {
      Ok(response) => {
        self.outbox.remove(&action.id).await?;
        for key in &action.invalidates {
          if let Err(err) = self.cache.invalidate(key).await {
            warn!(key = %key, error = %err, "failed to invalidate cache after replay");
          }
        }
        debug!(action_id = %action.id, kind = %action.kind, "action replayed");
        summary.succeeded += 1;
        self.outbox.complete(&action.id, Ok(response));
        Ok(Step::Continue)
      }
      Err(SyncError::NetworkUnavailable(_)) if !self.monitor.is_online() => {
        // Lost the link mid-request; the attempt does not count
        debug!(action_id = %action.id, "connectivity lost during replay");
        Ok(Step::Stop)
      }
      Err(err) if retry::should_retry(&err, action.retry_count, action.max_retries) => {
        debug!(action_id = %action.id, error = %err, "replay failed, requeueing");
        self.outbox.requeue_with_increment(&action.id).await?;
        Ok(Step::Continue)
      }
      Err(err) => {
        warn!(
          action_id = %action.id,
          kind = %action.kind,
          retries = action.retry_count,
          error = %err,
          "dropping action"
        );
        self.outbox.remove(&action.id).await?;
        summary.failed += 1;
        self.outbox.complete(&action.id, Err(err));
        Ok(Step::Continue)
      }
    }
  }

  /// Wait out the rest of a requeued action's backoff. Returns `false` if the
  /// wait was cut short by going offline or being halted.
  async fn pace(&self, action: &OutboxAction) -> bool {
    let (Some(last_attempt), Some(previous)) =
      (action.last_attempt_at, action.retry_count.checked_sub(1))
    else {
      return true;
    };

    let delay = self.settings.retry.delay_for_attempt(previous);
    let elapsed = (self.clock.now() - last_attempt).to_std().unwrap_or_default();
    let wait = delay.saturating_sub(elapsed);
    if wait.is_zero() {
      return true;
    }

    debug!(action_id = %action.id, ?wait, "waiting before re-attempt");
    let mut network = self.monitor.watch();
    let mut halted = self.halted.subscribe();
    tokio::select! {
      _ = tokio::time::sleep(wait) => true,
      _ = network.wait_for(|status| !status.online) => false,
      _ = halted.wait_for(|halted| *halted) => false,
    }
  }

  /// Evict expired actions and fail their waiting callers.
  pub async fn evict_expired(&self) -> Result<usize> {
    let evicted = self.outbox.evict_expired(self.settings.max_age).await?;
    for action in &evicted {
      warn!(action_id = %action.id, kind = %action.kind, "queued action expired");
      self.outbox.complete(
        &action.id,
        Err(SyncError::Expired {
          action_id: action.id.clone(),
        }),
      );
    }
    Ok(evicted.len())
  }

  /// Stop any running drain and refuse new ones until [`resume`](Self::resume).
  /// Returns once the coordinator is idle.
  pub async fn halt(&self) {
    self.halted.send_replace(true);
    let mut state = self.state.subscribe();
    let _ = state.wait_for(|state| *state == SyncState::Idle).await;
    debug!("sync coordinator halted");
  }

  pub fn resume(&self) {
    self.halted.send_replace(false);
  }

  /// Drain on every reconnect, and periodically evict expired actions and
  /// retry a non-empty queue.
  pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
    let coordinator = Arc::clone(self);
    let mut events = self.monitor.subscribe();

    tokio::spawn(async move {
      let mut tick = tokio::time::interval(coordinator.settings.maintenance_interval);
      tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          event = events.recv() => match event {
            Ok(NetworkEvent::BecameOnline) => coordinator.trigger(),
            Ok(NetworkEvent::BecameOffline) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
              debug!(skipped, "network events lagged");
              if coordinator.monitor.is_online() {
                coordinator.trigger();
              }
            }
            Err(broadcast::error::RecvError::Closed) => break,
          },
          _ = tick.tick() => coordinator.maintain().await,
        }
      }
    })
  }

  /// Start a drain in the background.
  pub fn trigger(self: &Arc<Self>) {
    let coordinator = Arc::clone(self);
    tokio::spawn(async move {
      coordinator.drain().await;
    });
  }

  async fn maintain(self: &Arc<Self>) {
    if self.is_halted() {
      return;
    }
    if let Err(err) = self.evict_expired().await {
      warn!(error = %err, "outbox maintenance failed");
      return;
    }
    if self.monitor.is_online() && !self.outbox.is_empty().await.unwrap_or(true) {
      self.trigger();
    }
  }
}
