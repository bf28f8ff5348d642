//! Connectivity state and transition events.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::signal::NetworkSignalSource;

/// Coarse link quality. Advisory only: it picks request timeouts and never
/// gates correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
  Slow,
  Medium,
  Fast,
  Unknown,
}

impl ConnectionQuality {
  /// Classify from whatever link hints the environment exposes.
  pub fn from_hints(hints: &LinkHints) -> Self {
    if let Some(effective_type) = hints.effective_type.as_deref() {
      match effective_type {
        "slow-2g" | "2g" => return ConnectionQuality::Slow,
        "3g" => return ConnectionQuality::Medium,
        "4g" => return ConnectionQuality::Fast,
        _ => {}
      }
    }

    let by_rtt = hints.rtt_ms.map(|rtt| match rtt {
      0..=300 => ConnectionQuality::Fast,
      301..=1000 => ConnectionQuality::Medium,
      _ => ConnectionQuality::Slow,
    });
    let by_downlink = hints.downlink_mbps.map(|mbps| {
      if mbps < 0.5 {
        ConnectionQuality::Slow
      } else if mbps < 2.0 {
        ConnectionQuality::Medium
      } else {
        ConnectionQuality::Fast
      }
    });

    match (by_rtt, by_downlink) {
      (Some(a), Some(b)) => a.worst(b),
      (Some(q), None) | (None, Some(q)) => q,
      (None, None) => ConnectionQuality::Unknown,
    }
  }

  fn rank(self) -> u8 {
    match self {
      ConnectionQuality::Slow => 0,
      ConnectionQuality::Medium => 1,
      ConnectionQuality::Unknown => 2,
      ConnectionQuality::Fast => 3,
    }
  }

  fn worst(self, other: Self) -> Self {
    if self.rank() <= other.rank() {
      self
    } else {
      other
    }
  }

  /// Deadline for a single request on a link of this quality.
  pub fn request_timeout(self) -> Duration {
    match self {
      ConnectionQuality::Slow => Duration::from_secs(30),
      ConnectionQuality::Medium => Duration::from_secs(15),
      ConnectionQuality::Fast => Duration::from_secs(8),
      ConnectionQuality::Unknown => Duration::from_secs(10),
    }
  }
}

impl std::fmt::Display for ConnectionQuality {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConnectionQuality::Slow => write!(f, "slow"),
      ConnectionQuality::Medium => write!(f, "medium"),
      ConnectionQuality::Fast => write!(f, "fast"),
      ConnectionQuality::Unknown => write!(f, "unknown"),
    }
  }
}

/// Optional link-quality hints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkHints {
  /// e.g. "4g", "3g", "2g", "slow-2g"
  pub effective_type: Option<String>,
  pub rtt_ms: Option<u64>,
  pub downlink_mbps: Option<f64>,
}

/// One observation from a signal source.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSignal {
  pub online: bool,
  pub hints: LinkHints,
}

impl LinkSignal {
  pub fn online() -> Self {
    Self {
      online: true,
      hints: LinkHints::default(),
    }
  }

  pub fn offline() -> Self {
    Self {
      online: false,
      hints: LinkHints::default(),
    }
  }

  pub fn with_hints(mut self, hints: LinkHints) -> Self {
    self.hints = hints;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
  BecameOnline,
  BecameOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
  pub online: bool,
  pub quality: ConnectionQuality,
}

/// Tracks connectivity and publishes transitions.
///
/// State is updated before the matching event is broadcast, so a listener
/// reacting to `BecameOffline` already sees `is_online() == false`.
pub struct NetworkStatusMonitor {
  status: watch::Sender<NetworkStatus>,
  events: broadcast::Sender<NetworkEvent>,
}

impl NetworkStatusMonitor {
  pub fn new(online: bool) -> Self {
    let (status, _) = watch::channel(NetworkStatus {
      online,
      quality: ConnectionQuality::Unknown,
    });
    let (events, _) = broadcast::channel(64);
    Self { status, events }
  }

  pub fn status(&self) -> NetworkStatus {
    *self.status.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.status.borrow().online
  }

  pub fn quality(&self) -> ConnectionQuality {
    self.status.borrow().quality
  }

  /// Watch the current status.
  pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
    self.status.subscribe()
  }

  /// Subscribe to online/offline transitions.
  pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
    self.events.subscribe()
  }

  /// Fold one signal into the state. Returns the transition it caused.
  pub fn apply(&self, signal: &LinkSignal) -> Option<NetworkEvent> {
    let quality = if signal.online {
      ConnectionQuality::from_hints(&signal.hints)
    } else {
      ConnectionQuality::Unknown
    };

    let mut event = None;
    self.status.send_if_modified(|status| {
      let changed = status.online != signal.online || status.quality != quality;
      if status.online != signal.online {
        event = Some(if signal.online {
          NetworkEvent::BecameOnline
        } else {
          NetworkEvent::BecameOffline
        });
      }
      status.online = signal.online;
      status.quality = quality;
      changed
    });

    if let Some(event) = event {
      info!(?event, %quality, "connectivity changed");
      // No subscribers is fine
      let _ = self.events.send(event);
    }
    event
  }

  /// Consume a signal source until it ends.
  pub fn spawn<S>(self: &Arc<Self>, mut source: S) -> JoinHandle<()>
  where
    S: NetworkSignalSource + 'static,
  {
    let monitor = Arc::clone(self);
    tokio::spawn(async move {
      while let Some(signal) = source.next_signal().await {
        monitor.apply(&signal);
      }
      debug!("network signal source ended");
    })
  }
}
