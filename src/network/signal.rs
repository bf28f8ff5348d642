//! Sources of connectivity signals.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

use super::monitor::{LinkHints, LinkSignal};

/// Something that reports connectivity. The monitor is its only consumer.
#[async_trait]
pub trait NetworkSignalSource: Send {
  /// Next observation, or `None` when the source is finished.
  async fn next_signal(&mut self) -> Option<LinkSignal>;
}

/// Production source: periodically probes a health URL and measures the
/// round trip. Any HTTP response counts as online.
pub struct HttpProbe {
  client: reqwest::Client,
  url: String,
  timeout: Duration,
  interval: Interval,
}

impl HttpProbe {
  pub fn new(url: impl Into<String>, every: Duration) -> Self {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    Self {
      client: reqwest::Client::new(),
      url: url.into(),
      timeout: Duration::from_secs(5),
      interval,
    }
  }

  /// Probe once, right now.
  pub async fn probe_once(&self) -> LinkSignal {
    let started = Instant::now();
    match self
      .client
      .head(&self.url)
      .timeout(self.timeout)
      .send()
      .await
    {
      Ok(_) => {
        let rtt_ms = started.elapsed().as_millis() as u64;
        LinkSignal::online().with_hints(LinkHints {
          rtt_ms: Some(rtt_ms),
          ..Default::default()
        })
      }
      Err(e) => {
        debug!(url = %self.url, error = %e, "probe failed");
        LinkSignal::offline()
      }
    }
  }
}

#[async_trait]
impl NetworkSignalSource for HttpProbe {
  async fn next_signal(&mut self) -> Option<LinkSignal> {
    self.interval.tick().await;
    Some(self.probe_once().await)
  }
}

/// Deterministic source driven by a [`ManualSignalHandle`].
pub struct ManualSignal {
  rx: mpsc::UnboundedReceiver<LinkSignal>,
}

/// Pushes signals into a [`ManualSignal`]. Dropping every handle ends the
/// source.
#[derive(Clone)]
pub struct ManualSignalHandle {
  tx: mpsc::UnboundedSender<LinkSignal>,
}

impl ManualSignal {
  pub fn new() -> (ManualSignalHandle, ManualSignal) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ManualSignalHandle { tx }, ManualSignal { rx })
  }
}

impl ManualSignalHandle {
  pub fn send(&self, signal: LinkSignal) {
    // Receiver gone means nobody is listening any more
    let _ = self.tx.send(signal);
  }

  pub fn go_online(&self) {
    self.send(LinkSignal::online());
  }

  pub fn go_offline(&self) {
    self.send(LinkSignal::offline());
  }

  pub fn set_hints(&self, hints: LinkHints) {
    self.send(LinkSignal::online().with_hints(hints));
  }

  /// Drop the link and bring it straight back.
  pub fn flap(&self) {
    self.go_offline();
    self.go_online();
  }
}

#[async_trait]
impl NetworkSignalSource for ManualSignal {
  async fn next_signal(&mut self) -> Option<LinkSignal> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_probe_against_live_server_is_online() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("HEAD", "/health")
      .with_status(200)
      .create_async()
      .await;

    let probe = HttpProbe::new(format!("{}/health", server.url()), Duration::from_secs(15));
    let signal = probe.probe_once().await;
    assert!(signal.online);
    assert!(signal.hints.rtt_ms.is_some());
  }

  #[tokio::test]
  async fn test_probe_against_dead_port_is_offline() {
    let probe = HttpProbe::new("http://127.0.0.1:1/health", Duration::from_secs(15));
    assert!(!probe.probe_once().await.online);
  }

  #[tokio::test]
  async fn test_manual_signal_replays_in_order() {
    let (handle, mut source) = ManualSignal::new();
    handle.go_offline();
    handle.set_hints(LinkHints {
      effective_type: Some("4g".into()),
      ..Default::default()
    });
    drop(handle);

    assert!(!source.next_signal().await.unwrap().online);
    let signal = source.next_signal().await.unwrap();
    assert!(signal.online);
    assert_eq!(signal.hints.effective_type.as_deref(), Some("4g"));
    assert!(source.next_signal().await.is_none());
  }
}
