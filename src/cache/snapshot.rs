//! Last-known-good entity records, one table per entity type.
//!
//! Snapshots are never the source of truth. They are overwritten wholesale on
//! every successful fetch and only read when the network is unavailable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::store::{PersistentStore, StoreExt};

/// Entity types that keep an offline snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Property,
  Tenant,
  Contract,
  Payment,
  MaintenanceRequest,
}

impl EntityKind {
  /// Storage table holding this entity type
  pub fn table(self) -> &'static str {
    match self {
      EntityKind::Property => "properties",
      EntityKind::Tenant => "tenants",
      EntityKind::Contract => "contracts",
      EntityKind::Payment => "payments",
      EntityKind::MaintenanceRequest => "maintenance_requests",
    }
  }
}

/// How a read maps onto a snapshot table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotBinding {
  /// The response is the full list of entities of this kind
  Collection(EntityKind),
  /// The response is the single entity with this id
  Record(EntityKind, String),
}

impl SnapshotBinding {
  pub fn kind(&self) -> EntityKind {
    match self {
      SnapshotBinding::Collection(kind) | SnapshotBinding::Record(kind, _) => *kind,
    }
  }
}

pub struct SnapshotStore {
  store: Arc<dyn PersistentStore>,
}

impl SnapshotStore {
  pub fn new(store: Arc<dyn PersistentStore>) -> Self {
    Self { store }
  }

  /// Overwrite the snapshot covered by `binding` with a fresh response body.
  pub async fn record(&self, binding: &SnapshotBinding, value: &Value) -> Result<()> {
    match binding {
      SnapshotBinding::Collection(kind) => {
        let items = value.as_array().ok_or_else(|| {
          SyncError::Decode(format!("expected a list of {}", kind.table()))
        })?;

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
          let Some(id) = entity_id(item) else {
            debug!(table = kind.table(), "skipping snapshot record without id");
            continue;
          };
          let bytes = serde_json::to_vec(item)
            .map_err(|e| SyncError::storage("failed to encode snapshot", e))?;
          entries.push((id, bytes));
        }

        self.store.replace_table(kind.table(), entries).await
      }
      SnapshotBinding::Record(kind, id) => self.store.put_json(kind.table(), id, value).await,
    }
  }

  /// Read the snapshot covered by `binding`, if any.
  pub async fn lookup(&self, binding: &SnapshotBinding) -> Result<Option<Value>> {
    match binding {
      SnapshotBinding::Collection(kind) => {
        let records: Vec<Value> = self.store.get_all_json(kind.table()).await?;
        if records.is_empty() {
          Ok(None)
        } else {
          Ok(Some(Value::Array(records)))
        }
      }
      SnapshotBinding::Record(kind, id) => self.store.get_json(kind.table(), id).await,
    }
  }
}

/// Extract the `id` field of a JSON record as a string key.
fn entity_id(value: &Value) -> Option<String> {
  match value.get("id")? {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStore;
  use serde_json::json;

  fn snapshots() -> SnapshotStore {
    SnapshotStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
  }

  #[tokio::test]
  async fn test_collection_is_overwritten_wholesale() {
    let snapshots = snapshots();
    let binding = SnapshotBinding::Collection(EntityKind::Property);

    snapshots
      .record(&binding, &json!([{"id": "p1"}, {"id": "p2"}]))
      .await
      .unwrap();
    snapshots
      .record(&binding, &json!([{"id": "p3", "name": "Loft"}]))
      .await
      .unwrap();

    let value = snapshots.lookup(&binding).await.unwrap().unwrap();
    assert_eq!(value, json!([{"id": "p3", "name": "Loft"}]));
  }

  #[tokio::test]
  async fn test_collection_records_are_readable_individually() {
    let snapshots = snapshots();
    snapshots
      .record(
        &SnapshotBinding::Collection(EntityKind::Tenant),
        &json!([{"id": 7, "name": "Ana"}, {"name": "no id"}]),
      )
      .await
      .unwrap();

    let tenant = snapshots
      .lookup(&SnapshotBinding::Record(EntityKind::Tenant, "7".into()))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(tenant["name"], "Ana");
  }

  #[tokio::test]
  async fn test_missing_snapshot_is_none() {
    let snapshots = snapshots();
    assert!(snapshots
      .lookup(&SnapshotBinding::Collection(EntityKind::Payment))
      .await
      .unwrap()
      .is_none());
    assert!(snapshots
      .lookup(&SnapshotBinding::Record(EntityKind::Payment, "x".into()))
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_collection_requires_a_list() {
    let snapshots = snapshots();
    let err = snapshots
      .record(
        &SnapshotBinding::Collection(EntityKind::Contract),
        &json!({"id": "c1"}),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Decode(_)));
  }
}
