//! Shared fakes for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::http::{ApiRequest, ApiResponse, HttpTransport};

type Hook = Box<dyn Fn(&ApiRequest) + Send + Sync>;

/// Transport that replays scripted outcomes per URL and records every call.
/// URLs without a script answer `200 {}`.
#[derive(Default)]
pub struct ScriptedTransport {
  calls: Mutex<Vec<ApiRequest>>,
  scripts: Mutex<HashMap<String, VecDeque<Result<ApiResponse>>>>,
  hook: Mutex<Option<Hook>>,
  hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl ScriptedTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Queue outcomes for `url`, consumed one per call.
  pub fn script(&self, url: &str, outcomes: Vec<Result<ApiResponse>>) {
    self
      .scripts
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .extend(outcomes);
  }

  /// Run `hook` before answering each call.
  pub fn on_call(&self, hook: impl Fn(&ApiRequest) + Send + Sync + 'static) {
    *self.hook.lock().unwrap() = Some(Box::new(hook));
  }

  /// Make the next call block until released. Returns `(entered, release)`.
  pub fn hold_next_call(&self) -> (Arc<Notify>, Arc<Notify>) {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    *self.hold.lock().unwrap() = Some((entered.clone(), release.clone()));
    (entered, release)
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn called_urls(&self) -> Vec<String> {
    self.calls().into_iter().map(|r| r.url).collect()
  }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
    self.calls.lock().unwrap().push(request.clone());
    if let Some(hook) = self.hook.lock().unwrap().as_ref() {
      hook(request);
    }

    let hold = self.hold.lock().unwrap().take();
    if let Some((entered, release)) = hold {
      entered.notify_one();
      release.notified().await;
    }

    let scripted = self
      .scripts
      .lock()
      .unwrap()
      .get_mut(&request.url)
      .and_then(|q| q.pop_front());
    scripted.unwrap_or_else(|| Ok(json(&serde_json::json!({}))))
  }
}

/// Wall clock driven by tokio time, so paused-time tests age data while
/// sleeping.
pub struct TokioClock {
  start: DateTime<Utc>,
  origin: tokio::time::Instant,
}

impl TokioClock {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      start: Utc::now(),
      origin: tokio::time::Instant::now(),
    })
  }
}

impl Clock for TokioClock {
  fn now(&self) -> DateTime<Utc> {
    let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap();
    self.start + elapsed
  }
}

pub fn json(value: &Value) -> ApiResponse {
  ApiResponse {
    status: 200,
    body: serde_json::to_vec(value).unwrap(),
  }
}

pub fn transient() -> SyncError {
  SyncError::Transient {
    status: Some(503),
    message: "service unavailable".into(),
  }
}

pub fn permanent() -> SyncError {
  SyncError::Permanent {
    status: Some(422),
    message: "validation failed".into(),
  }
}
