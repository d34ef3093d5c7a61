use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::traits::BlobStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS blobs (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

/// SQLite-backed key-value store for saved workflows.
pub struct SqliteBlobStore {
    conn: Mutex<Connection>,
}

impl SqliteBlobStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowdeckError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| FlowdeckError::Database(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| FlowdeckError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowdeckError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Blob store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| FlowdeckError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowdeckError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Last write time of a key, RFC 3339.
    pub fn updated_at(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FlowdeckError::Database(e.to_string()))?;
        conn.query_row(
            "SELECT updated_at FROM blobs WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| FlowdeckError::Database(e.to_string()))
    }
}

impl BlobStore for SqliteBlobStore {
    fn put(&self, key: &str, value: String) -> BoxFuture<'_, Result<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| FlowdeckError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO blobs (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|e| FlowdeckError::Database(e.to_string()))?;
            debug!(key = %key, bytes = value.len(), "Blob saved");
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| FlowdeckError::Database(e.to_string()))?;
            conn.query_row(
                "SELECT value FROM blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| FlowdeckError::Database(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteBlobStore::in_memory().unwrap();
        store.put("workflow_data", "[]".into()).await.unwrap();
        assert_eq!(store.get("workflow_data").await.unwrap().as_deref(), Some("[]"));
        assert!(store.updated_at("workflow_data").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = SqliteBlobStore::in_memory().unwrap();
        store.put("k", "first".into()).await.unwrap();
        store.put("k", "second".into()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = SqliteBlobStore::in_memory().unwrap();
        assert!(store.get("nothing").await.unwrap().is_none());
        assert!(store.updated_at("nothing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flows.db");
        {
            let store = SqliteBlobStore::open(&path).unwrap();
            store.put("workflow_data", "[1]".into()).await.unwrap();
        }
        let store = SqliteBlobStore::open(&path).unwrap();
        assert_eq!(store.get("workflow_data").await.unwrap().as_deref(), Some("[1]"));
    }
}
