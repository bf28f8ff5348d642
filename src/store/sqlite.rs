//! SQLite implementation of the persistent store.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::PersistentStore;
use crate::error::{Result, SyncError};

/// SQLite-backed store. All tables share one `records` table keyed by
/// `(table_name, record_key)`.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::storage("failed to create store directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::storage(&format!("failed to open store at {}", path.display()), e)
    })?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory store. Nothing survives the process.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| SyncError::storage("failed to open in-memory store", e))?;
    Self::from_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::StorageUnavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("rentsync").join("store.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| SyncError::storage("failed to run store migrations", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn with_conn<T>(
    &self,
    context: &str,
    f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
  ) -> Result<T> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| SyncError::storage("store lock poisoned", e))?;
    f(&mut conn).map_err(|e| SyncError::storage(context, e))
  }
}

/// Schema and durability settings. `synchronous = FULL` makes every commit
/// reach the disk before the call returns.
const STORE_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;

CREATE TABLE IF NOT EXISTS records (
    table_name TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (table_name, record_key)
);
"#;

#[async_trait]
impl PersistentStore for SqliteStore {
  async fn put(&self, table: &str, key: &str, value: Vec<u8>) -> Result<()> {
    self.with_conn("failed to store record", |conn| {
      conn.execute(
        "INSERT OR REPLACE INTO records (table_name, record_key, data, stored_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![table, key, value],
      )?;
      Ok(())
    })
  }

  async fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
    self.with_conn("failed to read record", |conn| {
      conn
        .query_row(
          "SELECT data FROM records WHERE table_name = ? AND record_key = ?",
          params![table, key],
          |row| row.get(0),
        )
        .optional()
    })
  }

  async fn get_all(&self, table: &str) -> Result<Vec<Vec<u8>>> {
    self.with_conn("failed to list records", |conn| {
      let mut stmt =
        conn.prepare("SELECT data FROM records WHERE table_name = ? ORDER BY record_key")?;
      let rows = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
      Ok(rows)
    })
  }

  async fn delete(&self, table: &str, key: &str) -> Result<()> {
    self.with_conn("failed to delete record", |conn| {
      conn.execute(
        "DELETE FROM records WHERE table_name = ? AND record_key = ?",
        params![table, key],
      )?;
      Ok(())
    })
  }

  async fn replace_table(&self, table: &str, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
    self.with_conn("failed to replace table", |conn| {
      let tx = conn.transaction()?;
      tx.execute("DELETE FROM records WHERE table_name = ?", params![table])?;
      {
        let mut stmt = tx.prepare(
          "INSERT OR REPLACE INTO records (table_name, record_key, data, stored_at)
           VALUES (?, ?, ?, datetime('now'))",
        )?;
        for (key, data) in &entries {
          stmt.execute(params![table, key, data])?;
        }
      }
      tx.commit()
    })
  }

  async fn clear_all(&self) -> Result<()> {
    self.with_conn("failed to clear store", |conn| {
      let tx = conn.transaction()?;
      tx.execute("DELETE FROM records", [])?;
      tx.commit()
    })
  }
}
