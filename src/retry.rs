//! Retry eligibility and exponential backoff with jitter.
//!
//! `should_retry` and `next_delay` are pure; [`with_resilience`] applies them
//! around a single call site so the retry policy stays visible where it is
//! used.
//!
//! # Backoff schedule (defaults)
//!
//! | Attempt | Base delay | With up to +10% jitter |
//! |---------|-----------|------------------------|
//! | 0       | 1s        | 1.0–1.1s               |
//! | 1       | 2s        | 2.0–2.2s               |
//! | 2       | 4s        | 4.0–4.4s               |
//! | 3       | 8s        | 8.0–8.8s               |
//! | 4       | 16s       | 16.0–17.6s             |
//! | 5+      | 30s cap   | 30s                    |

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Jitter is drawn from `[0, JITTER_RATIO]` of the exponential term.
pub const JITTER_RATIO: f64 = 0.1;

/// Retry configuration for one kind of call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts, including the first
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
  pub backoff_factor: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(1000),
      max_delay: Duration::from_millis(30_000),
      backoff_factor: 2.0,
    }
  }
}

impl RetryPolicy {
  /// Delay to wait after the given (0-based) failed attempt.
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    next_delay(attempt, self.base_delay, self.max_delay, self.backoff_factor)
  }
}

/// Whether a failure on `attempt` (number of retries already spent) should be
/// retried when at most `max_retries` retries are allowed.
pub fn should_retry(error: &SyncError, attempt: u32, max_retries: u32) -> bool {
  attempt < max_retries && error.is_retryable()
}

/// `min(base * factor^attempt + jitter, max)` with random jitter.
pub fn next_delay(attempt: u32, base: Duration, max: Duration, factor: f64) -> Duration {
  next_delay_with_jitter(attempt, base, max, factor, rand::random::<f64>())
}

/// Deterministic form of [`next_delay`]. `jitter` is a fraction in `[0, 1]`
/// of the maximum jitter.
pub fn next_delay_with_jitter(
  attempt: u32,
  base: Duration,
  max: Duration,
  factor: f64,
  jitter: f64,
) -> Duration {
  let exponent = attempt.min(1024) as i32;
  let exponential = base.as_millis() as f64 * factor.powi(exponent);
  let jitter = exponential * JITTER_RATIO * jitter.clamp(0.0, 1.0);
  let capped = (exponential + jitter).min(max.as_millis() as f64);

  if capped.is_finite() {
    Duration::from_millis(capped as u64)
  } else {
    max
  }
}

/// Run `op`, retrying retryable failures per `policy` with backoff.
///
/// Returns the first success or the last error. Non-retryable errors are
/// returned immediately.
pub async fn with_resilience<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let max_retries = policy.max_attempts.saturating_sub(1);
  let mut attempt = 0;

  loop {
    match op().await {
      Ok(value) => {
        if attempt > 0 {
          debug!(label, attempts = attempt + 1, "request succeeded after retry");
        }
        return Ok(value);
      }
      Err(err) if should_retry(&err, attempt, max_retries) => {
        let delay = policy.delay_for_attempt(attempt);
        warn!(label, attempt = attempt + 1, ?delay, error = %err, "request failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(err) => return Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn transient() -> SyncError {
    SyncError::Transient {
      status: Some(503),
      message: "busy".into(),
    }
  }

  #[test]
  fn test_should_retry_classification() {
    assert!(should_retry(&transient(), 0, 3));
    assert!(should_retry(&SyncError::NetworkUnavailable("down".into()), 2, 3));
    assert!(!should_retry(&transient(), 3, 3));

    let permanent = SyncError::Permanent {
      status: Some(422),
      message: "invalid amount".into(),
    };
    assert!(!should_retry(&permanent, 0, 3));
  }

  #[test]
  fn test_delay_doubles_without_jitter() {
    let base = Duration::from_millis(1000);
    let max = Duration::from_millis(30_000);
    let delays: Vec<u64> = (0..6)
      .map(|a| next_delay_with_jitter(a, base, max, 2.0, 0.0).as_millis() as u64)
      .collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000]);
  }

  #[test]
  fn test_delay_is_monotonic_and_capped() {
    let base = Duration::from_millis(1000);
    let max = Duration::from_millis(30_000);

    // Worst case for monotonicity: max jitter now, no jitter next
    for attempt in 0..64 {
      let high = next_delay_with_jitter(attempt, base, max, 2.0, 1.0);
      let next_low = next_delay_with_jitter(attempt + 1, base, max, 2.0, 0.0);
      assert!(next_low >= high, "attempt {}: {:?} < {:?}", attempt, next_low, high);
      assert!(high <= max);
    }

    for attempt in [0, 5, 31, 32, 1000, u32::MAX] {
      assert!(next_delay(attempt, base, max, 2.0) <= max);
    }
  }

  #[test]
  fn test_jitter_is_bounded() {
    let base = Duration::from_millis(1000);
    let max = Duration::from_secs(60);
    for _ in 0..100 {
      let delay = next_delay(2, base, max, 2.0);
      assert!(delay >= Duration::from_millis(4000));
      assert!(delay <= Duration::from_millis(4400));
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_with_resilience_stops_after_max_attempts() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::default();

    let result: Result<()> = with_resilience(&policy, "test", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(transient()) }
    })
    .await;

    assert_eq!(result.unwrap_err(), transient());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_with_resilience_recovers() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::default();

    let result = with_resilience(&policy, "test", || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Err(transient())
        } else {
          Ok(n)
        }
      }
    })
    .await;

    assert_eq!(result.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_with_resilience_does_not_retry_permanent_errors() {
    let calls = AtomicU32::new(0);
    let result: Result<()> = with_resilience(&RetryPolicy::default(), "test", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async {
        Err(SyncError::Permanent {
          status: Some(400),
          message: "bad".into(),
        })
      }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
