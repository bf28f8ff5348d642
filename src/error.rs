//! Error taxonomy for the offline data access layer.
//!
//! Every failure that crosses a component boundary is classified here so the
//! retry scheduler, the outbox and the request facade can agree on what is
//! worth retrying, what should be queued and what must go straight back to
//! the caller.

use thiserror::Error;

/// Result type alias used throughout the data access layer
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
  /// No connectivity, or the request never produced a response
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// 5xx, 429 or a timed out request
  #[error("transient failure: {message}")]
  Transient {
    status: Option<u16>,
    message: String,
  },

  /// 4xx other than 429, or a request that can never succeed as written
  #[error("request rejected: {message}")]
  Permanent {
    status: Option<u16>,
    message: String,
  },

  /// The persistent store could not be read or written
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  /// A queued mutation aged past the outbox max-age before it was delivered
  #[error("queued action {action_id} expired before it could be delivered")]
  Expired { action_id: String },

  /// A queued mutation was discarded (logout) before it was delivered
  #[error("queued action {action_id} was discarded before delivery")]
  Abandoned { action_id: String },

  /// Offline read with neither a cache entry nor a snapshot to fall back on
  #[error("no cached or live data available for {key}")]
  Unavailable { key: String },

  /// The response body did not match the requested type
  #[error("failed to decode response: {0}")]
  Decode(String),
}

impl SyncError {
  /// Whether the failure may go away on its own if the request is repeated.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      SyncError::NetworkUnavailable(_) | SyncError::Transient { .. }
    )
  }

  pub fn timeout(after: std::time::Duration) -> Self {
    SyncError::Transient {
      status: None,
      message: format!("request timed out after {:?}", after),
    }
  }

  pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
    SyncError::StorageUnavailable(format!("{}: {}", context, err))
  }

  /// Classify a non-success HTTP status. Returns `None` for 2xx.
  pub fn from_status(status: u16, body: &[u8]) -> Option<Self> {
    if (200..300).contains(&status) {
      return None;
    }

    let detail = String::from_utf8_lossy(body);
    let detail = detail.trim();
    let message = if detail.is_empty() {
      format!("HTTP {}", status)
    } else {
      format!("HTTP {}: {}", status, truncate(detail, 200))
    };

    if status == 429 || status >= 500 {
      Some(SyncError::Transient {
        status: Some(status),
        message,
      })
    } else {
      Some(SyncError::Permanent {
        status: Some(status),
        message,
      })
    }
  }
}

fn truncate(s: &str, max: usize) -> &str {
  match s.char_indices().nth(max) {
    Some((idx, _)) => &s[..idx],
    None => s,
  }
}
