use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::EntityKind;

/// An API resource that keeps an offline snapshot.
pub trait Entity {
  const KIND: EntityKind;
}

/// A rentable property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
  pub id: String,
  pub name: String,
  pub address: String,
  #[serde(default)]
  pub units: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
  pub id: String,
  pub name: String,
  pub email: Option<String>,
  pub phone: Option<String>,
}

/// Lease binding a tenant to a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
  pub id: String,
  pub property_id: String,
  pub tenant_id: String,
  pub start_date: NaiveDate,
  pub end_date: Option<NaiveDate>,
  pub monthly_rent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
  pub id: String,
  pub contract_id: String,
  pub amount: f64,
  pub paid_at: DateTime<Utc>,
  pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
  Open,
  InProgress,
  Resolved,
}

impl std::fmt::Display for MaintenanceStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      MaintenanceStatus::Open => write!(f, "open"),
      MaintenanceStatus::InProgress => write!(f, "in progress"),
      MaintenanceStatus::Resolved => write!(f, "resolved"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRequest {
  pub id: String,
  pub property_id: String,
  pub title: String,
  pub description: Option<String>,
  pub status: MaintenanceStatus,
  pub reported_at: DateTime<Utc>,
}

/// Body of a payment to record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
  pub contract_id: String,
  pub amount: f64,
  pub paid_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

/// Body of a maintenance request to file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMaintenanceRequest {
  pub property_id: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

macro_rules! entity {
  ($ty:ty, $kind:expr) => {
    impl Entity for $ty {
      const KIND: EntityKind = $kind;
    }
  };
}

entity!(Property, EntityKind::Property);
entity!(Tenant, EntityKind::Tenant);
entity!(Contract, EntityKind::Contract);
entity!(Payment, EntityKind::Payment);
entity!(MaintenanceRequest, EntityKind::MaintenanceRequest);
