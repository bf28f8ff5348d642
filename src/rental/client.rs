//! Rental API client on top of [`ResilientClient`].

use chrono::Duration as ChronoDuration;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheResult, SnapshotBinding};
use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::facade::{ReadRequest, ResilientClient, WriteOutcome, WriteRequest};
use crate::http::ApiRequest;

use super::types::{
  Contract, Entity, MaintenanceRequest, MaintenanceStatus, NewMaintenanceRequest, NewPayment,
  Payment, Property, Tenant,
};

/// Rental API client with transparent caching and offline writes.
///
/// Every list read refreshes the matching snapshot table, so single records
/// stay readable offline once their list has been fetched.
#[derive(Clone)]
pub struct RentalClient {
  api: ResilientClient,
  base: Url,
  ttl: Option<ChronoDuration>,
  /// Stamps new payments
  clock: Arc<dyn Clock>,
}

impl RentalClient {
  pub fn new(api: ResilientClient, base_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
    // Url::join drops the last segment unless the base ends in '/'
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    let base = Url::parse(&normalized).map_err(|e| SyncError::Permanent {
      status: None,
      message: format!("invalid API base URL {}: {}", base_url, e),
    })?;

    Ok(Self {
      api,
      base,
      ttl: None,
      clock,
    })
  }

  /// Cache lifetime for reads made through this client.
  pub fn with_ttl(mut self, ttl: ChronoDuration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn api(&self) -> &ResilientClient {
    &self.api
  }

  fn endpoint(&self, path: &str) -> Result<String> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map(String::from)
      .map_err(|e| SyncError::Permanent {
        status: None,
        message: format!("invalid API path {}: {}", path, e),
      })
  }

  fn read(&self, url: String, binding: SnapshotBinding) -> ReadRequest {
    let read = ReadRequest::get(url).with_snapshot(binding);
    match self.ttl {
      Some(ttl) => read.with_ttl(ttl),
      None => read,
    }
  }

  async fn list<T: Entity + DeserializeOwned>(&self, path: &str) -> Result<CacheResult<Vec<T>>> {
    let read = self.read(self.endpoint(path)?, SnapshotBinding::Collection(T::KIND));
    self.api.get(read).await
  }

  async fn one<T: Entity + DeserializeOwned>(
    &self,
    path: &str,
    id: &str,
  ) -> Result<CacheResult<T>> {
    let url = self.endpoint(&format!("{}/{}", path, id))?;
    let read = self.read(url, SnapshotBinding::Record(T::KIND, id.to_string()));
    self.api.get(read).await
  }

  pub async fn properties(&self) -> Result<CacheResult<Vec<Property>>> {
    self.list("properties").await
  }

  pub async fn property(&self, id: &str) -> Result<CacheResult<Property>> {
    self.one("properties", id).await
  }

  pub async fn tenants(&self) -> Result<CacheResult<Vec<Tenant>>> {
    self.list("tenants").await
  }

  pub async fn contracts(&self) -> Result<CacheResult<Vec<Contract>>> {
    self.list("contracts").await
  }

  pub async fn contract(&self, id: &str) -> Result<CacheResult<Contract>> {
    self.one("contracts", id).await
  }

  /// Payments recorded against one contract.
  ///
  /// Reads the full payment list so the whole table is available offline.
  pub async fn payments(&self, contract_id: &str) -> Result<CacheResult<Vec<Payment>>> {
    let all: CacheResult<Vec<Payment>> = self.list("payments").await?;
    Ok(all.map(|payments| {
      payments
        .into_iter()
        .filter(|p| p.contract_id == contract_id)
        .collect()
    }))
  }

  pub async fn maintenance_requests(&self) -> Result<CacheResult<Vec<MaintenanceRequest>>> {
    self.list("maintenance-requests").await
  }

  /// Record a payment. Queued for later when the API is unreachable.
  pub async fn record_payment(&self, contract_id: &str, amount: f64) -> Result<WriteOutcome> {
    let payment = NewPayment {
      contract_id: contract_id.to_string(),
      amount,
      paid_at: self.clock.now(),
      note: None,
    };
    let request = ApiRequest::new("POST", self.endpoint("payments")?).with_json(&payment)?;
    let write =
      WriteRequest::new("record_payment", request).invalidating(self.endpoint("payments")?);
    self.api.send(write).await
  }

  /// File a maintenance request for a property.
  pub async fn report_maintenance(
    &self,
    property_id: &str,
    title: &str,
    description: Option<&str>,
  ) -> Result<WriteOutcome> {
    let body = NewMaintenanceRequest {
      property_id: property_id.to_string(),
      title: title.to_string(),
      description: description.map(String::from),
    };
    let url = self.endpoint("maintenance-requests")?;
    let request = ApiRequest::new("POST", url.clone()).with_json(&body)?;
    self
      .api
      .send(WriteRequest::new("report_maintenance", request).invalidating(url))
      .await
  }

  pub async fn update_maintenance_status(
    &self,
    id: &str,
    status: MaintenanceStatus,
  ) -> Result<WriteOutcome> {
    let url = self.endpoint(&format!("maintenance-requests/{}", id))?;
    let request =
      ApiRequest::new("PATCH", url.clone()).with_json(&serde_json::json!({ "status": status }))?;
    let write = WriteRequest::new("update_maintenance_status", request)
      .invalidating(url)
      .invalidating(self.endpoint("maintenance-requests")?);
    self.api.send(write).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheManager, CacheSource, SnapshotStore};
  use crate::clock::ManualClock;
  use crate::network::{LinkSignal, NetworkStatusMonitor};
  use crate::outbox::OutboxQueue;
  use crate::store::{PersistentStore, SqliteStore};
  use crate::testing::{json, ScriptedTransport};
  use chrono::{DateTime, Utc};
  use serde_json::json as value;

  const BASE: &str = "https://api.test/v1";

  struct Harness {
    client: RentalClient,
    transport: Arc<ScriptedTransport>,
    monitor: Arc<NetworkStatusMonitor>,
    outbox: Arc<OutboxQueue>,
  }

  fn start_time() -> DateTime<Utc> {
    "2026-03-01T09:00:00Z".parse().unwrap()
  }

  fn harness() -> Harness {
    let store: Arc<dyn PersistentStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(start_time()));
    let outbox = Arc::new(OutboxQueue::new(Arc::clone(&store), clock.clone()));
    let transport = ScriptedTransport::new();
    let monitor = Arc::new(NetworkStatusMonitor::new(true));

    let api = ResilientClient::new(
      Arc::new(CacheManager::new(Arc::clone(&store), clock.clone())),
      Arc::new(SnapshotStore::new(store)),
      Arc::clone(&outbox),
      transport.clone(),
      Arc::clone(&monitor),
    );

    Harness {
      client: RentalClient::new(api, BASE, clock).unwrap(),
      transport,
      monitor,
      outbox,
    }
  }

  #[test]
  fn test_endpoints_keep_base_path() {
    let h = harness();
    assert_eq!(
      h.client.endpoint("/properties").unwrap(),
      "https://api.test/v1/properties"
    );

    let api = h.client.api().clone();
    let clock = Arc::new(ManualClock::default());
    let trailing = RentalClient::new(api, "https://api.test/v1/", clock).unwrap();
    assert_eq!(
      trailing.endpoint("tenants").unwrap(),
      "https://api.test/v1/tenants"
    );
  }

  #[tokio::test]
  async fn test_property_is_readable_offline_after_list_fetch() {
    let h = harness();
    h.transport.script(
      "https://api.test/v1/properties",
      vec![Ok(json(&value!([
        {"id": "p1", "name": "Harbour Loft", "address": "1 Quay St", "units": 4},
        {"id": "p2", "name": "Elm Cottage", "address": "9 Elm Rd"}
      ])))],
    );

    let list = h.client.properties().await.unwrap();
    assert_eq!(list.source, CacheSource::Network);
    assert_eq!(list.data.len(), 2);
    assert_eq!(list.data[1].units, 0);

    h.monitor.apply(&LinkSignal::offline());
    let property = h.client.property("p2").await.unwrap();
    assert_eq!(property.source, CacheSource::Snapshot);
    assert_eq!(property.data.name, "Elm Cottage");
  }

  #[tokio::test]
  async fn test_payments_are_filtered_by_contract() {
    let h = harness();
    h.transport.script(
      "https://api.test/v1/payments",
      vec![Ok(json(&value!([
        {"id": "pay1", "contractId": "c1", "amount": 900.0, "paidAt": "2026-01-01T00:00:00Z"},
        {"id": "pay2", "contractId": "c2", "amount": 750.0, "paidAt": "2026-01-02T00:00:00Z"},
        {"id": "pay3", "contractId": "c1", "amount": 900.0, "paidAt": "2026-02-01T00:00:00Z"}
      ])))],
    );

    let payments = h.client.payments("c1").await.unwrap();
    let ids: Vec<_> = payments.data.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["pay1", "pay3"]);
  }

  #[tokio::test]
  async fn test_offline_payment_is_queued_with_body() {
    let h = harness();
    h.monitor.apply(&LinkSignal::offline());

    let outcome = h.client.record_payment("c1", 950.0).await.unwrap();
    assert!(outcome.is_queued());

    let queued = h.outbox.peek_oldest().await.unwrap().unwrap();
    assert_eq!(queued.kind, "record_payment");
    assert_eq!(queued.method, "POST");
    assert_eq!(queued.target_url, "https://api.test/v1/payments");
    let body: serde_json::Value = serde_json::from_slice(&queued.body.unwrap()).unwrap();
    assert_eq!(body["contractId"], "c1");
    assert_eq!(body["amount"], 950.0);
    let paid_at: DateTime<Utc> = serde_json::from_value(body["paidAt"].clone()).unwrap();
    assert_eq!(paid_at, start_time());
  }

  #[tokio::test]
  async fn test_maintenance_status_update_is_a_patch() {
    let h = harness();

    let outcome = h
      .client
      .update_maintenance_status("m1", MaintenanceStatus::Resolved)
      .await
      .unwrap();
    assert!(!outcome.is_queued());

    let call = h.transport.calls().pop().unwrap();
    assert_eq!(call.method, "PATCH");
    assert_eq!(call.url, "https://api.test/v1/maintenance-requests/m1");
    let body: serde_json::Value = serde_json::from_slice(&call.body.unwrap()).unwrap();
    assert_eq!(body["status"], "resolved");
  }
}
