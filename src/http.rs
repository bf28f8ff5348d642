//! HTTP boundary: fully-specified requests, responses and the transport trait.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// A request carrying everything needed to replay it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
  pub method: String,
  /// Absolute URL
  pub url: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl ApiRequest {
  pub fn new(method: &str, url: impl Into<String>) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_string(), value.to_string());
    self
  }

  /// Attach a JSON body and the matching content type.
  pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
    let bytes = serde_json::to_vec(body).map_err(|e| SyncError::Permanent {
      status: None,
      message: format!("failed to encode request body: {}", e),
    })?;
    self.body = Some(bytes);
    Ok(self.with_header("content-type", "application/json"))
  }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl ApiResponse {
  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| SyncError::Decode(e.to_string()))
  }

  /// Body as JSON. An empty body is `null`.
  pub fn json_value(&self) -> Result<Value> {
    if self.body.iter().all(u8::is_ascii_whitespace) {
      return Ok(Value::Null);
    }
    self.json()
  }
}

/// Sends requests to the backend.
///
/// Implementations return `Ok` only for 2xx responses and classify every
/// failure into the [`SyncError`] taxonomy.
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// Send with a deadline. A timeout counts as a retryable failure.
pub async fn send_with_timeout(
  transport: &dyn HttpTransport,
  request: &ApiRequest,
  timeout: Duration,
) -> Result<ApiResponse> {
  match tokio::time::timeout(timeout, transport.send(request)).await {
    Ok(result) => result,
    Err(_) => Err(SyncError::timeout(timeout)),
  }
}

/// Production transport on top of reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
  token: Option<String>,
}

impl ReqwestTransport {
  pub fn new(token: Option<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("rentsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| SyncError::NetworkUnavailable(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client, token })
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
    let method =
      reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| SyncError::Permanent {
        status: None,
        message: format!("invalid method {}: {}", request.method, e),
      })?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(classify_reqwest_error)?;
    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(classify_reqwest_error)?
      .to_vec();

    match SyncError::from_status(status, &body) {
      Some(err) => Err(err),
      None => Ok(ApiResponse { status, body }),
    }
  }
}

fn classify_reqwest_error(err: reqwest::Error) -> SyncError {
  if err.is_timeout() {
    SyncError::Transient {
      status: None,
      message: err.to_string(),
    }
  } else if err.is_builder() {
    SyncError::Permanent {
      status: None,
      message: err.to_string(),
    }
  } else {
    SyncError::NetworkUnavailable(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Matcher;

  #[tokio::test]
  async fn test_success_returns_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/properties")
      .match_header("authorization", "Bearer secret")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"[{"id":"p1"}]"#)
      .create_async()
      .await;

    let transport = ReqwestTransport::new(Some("secret".into())).unwrap();
    let response = transport
      .send(&ApiRequest::get(format!("{}/properties", server.url())))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.json_value().unwrap()[0]["id"], "p1");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_body_and_headers_are_sent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/payments")
      .match_header("content-type", "application/json")
      .match_body(Matcher::PartialJsonString(r#"{"amount": 950.0}"#.into()))
      .with_status(201)
      .create_async()
      .await;

    let transport = ReqwestTransport::new(None).unwrap();
    let request = ApiRequest::new("post", format!("{}/payments", server.url()))
      .with_json(&serde_json::json!({"contractId": "c1", "amount": 950.0}))
      .unwrap();
    let response = transport.send(&request).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.json_value().unwrap(), Value::Null);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_error_statuses_are_classified() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/busy")
      .with_status(503)
      .create_async()
      .await;
    server
      .mock("GET", "/missing")
      .with_status(404)
      .with_body("no such property")
      .create_async()
      .await;

    let transport = ReqwestTransport::new(None).unwrap();

    let busy = transport
      .send(&ApiRequest::get(format!("{}/busy", server.url())))
      .await
      .unwrap_err();
    assert!(matches!(busy, SyncError::Transient { status: Some(503), .. }));

    let missing = transport
      .send(&ApiRequest::get(format!("{}/missing", server.url())))
      .await
      .unwrap_err();
    assert!(matches!(missing, SyncError::Permanent { status: Some(404), .. }));
  }

  #[tokio::test]
  async fn test_unreachable_host_is_network_unavailable() {
    let transport = ReqwestTransport::new(None).unwrap();
    let err = transport
      .send(&ApiRequest::get("http://127.0.0.1:1/properties"))
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::NetworkUnavailable(_)));
  }

  struct Stalled;

  #[async_trait]
  impl HttpTransport for Stalled {
    async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse> {
      std::future::pending().await
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_transient() {
    let err = send_with_timeout(
      &Stalled,
      &ApiRequest::get("http://example.invalid"),
      Duration::from_secs(8),
    )
    .await
    .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, SyncError::Transient { status: None, .. }));
  }
}
