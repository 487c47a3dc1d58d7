//! Persistent payload cache keyed by item identity.
//!
//! One SQLite table, one row per identity: raw payload bytes plus the time
//! the row was written. The layout version lives in `PRAGMA user_version`;
//! a database with any other version is wiped on open rather than rejected.
//!
//! SQLite calls are blocking, so every async method runs on the blocking
//! pool with its own connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::ItemId;

/// Current on-disk layout version
pub const STORE_VERSION: i64 = 1;

/// Database file name inside the store directory
pub const DB_FILE: &str = "content.sqlite";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage failures. All of these are the I/O failure kind: readers treat
/// them as a miss, writers log and carry on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Join(String),

    #[error("Corrupt entry for {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// A cached payload with its write time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: ItemId,
    pub payload: Bytes,
    pub written_at: DateTime<Utc>,
}

/// Outcome of a best-effort batch delete
#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    /// Identities processed without error (including ones that were absent)
    pub deleted: Vec<ItemId>,

    /// Identities whose delete failed, with the error text
    pub failed: Vec<(ItemId, String)>,
}

impl DeleteReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Entry count and total payload size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: u64,
    pub payload_bytes: u64,
}

/// SQLite-backed content store
#[derive(Debug, Clone)]
pub struct ContentStore {
    db_path: PathBuf,
}

impl ContentStore {
    /// Open (or create) the store inside `dir`
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);

        let conn = Connection::open(&db_path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;

        info!(path = %db_path.display(), "Content store opened");
        Ok(Self { db_path })
    }

    /// Open the store in the configured home directory
    pub fn open_default() -> anyhow::Result<Self> {
        let dir = crate::config::store_dir()?;
        Ok(Self::open(&dir)?)
    }

    /// Path to the SQLite database
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version != STORE_VERSION {
            if version != 0 {
                warn!(
                    found = version,
                    expected = STORE_VERSION,
                    "Content store layout mismatch, wiping"
                );
            }
            conn.execute_batch("DROP TABLE IF EXISTS entries;")?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
              id TEXT PRIMARY KEY,
              payload BLOB NOT NULL,
              written_at TEXT NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", STORE_VERSION)?;
        Ok(())
    }

    fn conn(db_path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Run `f` against a fresh connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::conn(&db_path)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Payload for `id`, or `None` if not cached
    pub async fn get(&self, id: &ItemId) -> Result<Option<Bytes>, StoreError> {
        let key = id.as_str().to_string();
        self.with_conn(move |conn| {
            let payload: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT payload FROM entries WHERE id = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(payload.map(Bytes::from))
        })
        .await
    }

    /// Full entry for `id`, including its write time
    pub async fn entry(&self, id: &ItemId) -> Result<Option<CacheEntry>, StoreError> {
        let key = id.as_str().to_string();
        self.with_conn(move |conn| {
            let row: Option<(Vec<u8>, String)> = conn
                .query_row(
                    "SELECT payload, written_at FROM entries WHERE id = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(payload, written_at)| {
                let written_at = DateTime::parse_from_rfc3339(&written_at)
                    .map_err(|e| StoreError::Corrupt {
                        id: key.clone(),
                        reason: e.to_string(),
                    })?
                    .with_timezone(&Utc);
                Ok(CacheEntry {
                    id: ItemId::new(key.clone()),
                    payload: Bytes::from(payload),
                    written_at,
                })
            })
            .transpose()
        })
        .await
    }

    /// Insert or overwrite the payload for `id`
    pub async fn put(&self, id: &ItemId, payload: Bytes) -> Result<(), StoreError> {
        let key = id.as_str().to_string();
        let size = payload.len();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO entries (id, payload, written_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, written_at = excluded.written_at",
                params![key, &payload[..], Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await?;

        debug!(%id, size, "Cached payload");
        Ok(())
    }

    /// Remove `id` if present
    pub async fn delete(&self, id: &ItemId) -> Result<(), StoreError> {
        let key = id.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM entries WHERE id = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    /// Delete every identity independently; one failure does not stop the rest
    pub async fn delete_many(&self, ids: &[ItemId]) -> DeleteReport {
        if ids.is_empty() {
            return DeleteReport::default();
        }

        let ids = ids.to_vec();
        let fallback = ids.clone();
        let result = self
            .with_conn(move |conn| {
                let mut report = DeleteReport::default();
                for id in ids {
                    match conn.execute("DELETE FROM entries WHERE id = ?1", params![id.as_str()]) {
                        Ok(_) => report.deleted.push(id),
                        Err(e) => report.failed.push((id, e.to_string())),
                    }
                }
                Ok(report)
            })
            .await;

        match result {
            Ok(report) => {
                if !report.is_ok() {
                    warn!(failed = report.failed.len(), "Some cache deletes failed");
                }
                report
            }
            Err(e) => {
                warn!(error = %e, "Batch cache delete failed");
                let reason = e.to_string();
                DeleteReport {
                    deleted: Vec::new(),
                    failed: fallback.into_iter().map(|id| (id, reason.clone())).collect(),
                }
            }
        }
    }

    /// Remove everything. Maintenance only.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let removed = self
            .with_conn(|conn| Ok(conn.execute("DELETE FROM entries", [])?))
            .await?;
        info!(removed, "Cleared content store");
        Ok(removed)
    }

    /// All cached identities, oldest write first
    pub async fn ids(&self) -> Result<Vec<ItemId>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM entries ORDER BY written_at, id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(ItemId::new(row?));
            }
            Ok(out)
        })
        .await
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_conn(|conn| {
            let (entries, payload_bytes): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(StoreStats {
                entries: entries.max(0) as u64,
                payload_bytes: payload_bytes.max(0) as u64,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (ContentStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::open(temp.path()).unwrap();
        (store, temp)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _temp) = create_test_store();
        let id = ItemId::from("v1");
        let payload = Bytes::from_static(&[0u8, 1, 2, 255, 0, 42]);

        store.put(&id, payload.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (store, _temp) = create_test_store();
        assert!(store.get(&ItemId::from("nope")).await.unwrap().is_none());
        assert!(store.entry(&ItemId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (store, _temp) = create_test_store();
        let id = ItemId::from("v1");

        store.put(&id, Bytes::from_static(b"old")).await.unwrap();
        store.put(&id, Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap().unwrap(), Bytes::from_static(b"new"));
        assert_eq!(store.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let (store, _temp) = create_test_store();
        store.delete(&ItemId::from("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_has_timestamp() {
        let (store, _temp) = create_test_store();
        let before = Utc::now() - chrono::Duration::seconds(1);
        store.put(&ItemId::from("v1"), Bytes::from_static(b"x")).await.unwrap();

        let entry = store.entry(&ItemId::from("v1")).await.unwrap().unwrap();
        assert_eq!(entry.payload, Bytes::from_static(b"x"));
        assert!(entry.written_at >= before);
    }

    #[tokio::test]
    async fn test_version_mismatch_wipes() {
        let temp = TempDir::new().unwrap();
        {
            let store = ContentStore::open(temp.path()).unwrap();
            store.put(&ItemId::from("v1"), Bytes::from_static(b"x")).await.unwrap();
        }

        let conn = Connection::open(temp.path().join(DB_FILE)).unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        drop(conn);

        let store = ContentStore::open(temp.path()).unwrap();
        assert!(store.get(&ItemId::from("v1")).await.unwrap().is_none());

        // Usable after the wipe
        store.put(&ItemId::from("v2"), Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(store.ids().await.unwrap(), vec![ItemId::from("v2")]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let temp = TempDir::new().unwrap();
        {
            let store = ContentStore::open(temp.path()).unwrap();
            store.put(&ItemId::from("v1"), Bytes::from_static(b"x")).await.unwrap();
        }

        let store = ContentStore::open(temp.path()).unwrap();
        assert!(store.get(&ItemId::from("v1")).await.unwrap().is_some());
    }
}
