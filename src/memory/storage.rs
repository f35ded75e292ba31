//! SQLite-backed durable storage for the memory store.
//!
//! Schema: `memory(id, key unique, data, metadata json nullable,
//! expires_at timestamp nullable, created_at, updated_at)`, indexed on key,
//! expires_at, created_at.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Error, Result};

use super::{MemoryRecord, MemoryStats};

pub struct SqliteMemoryStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStorage {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL,
                metadata TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_memory_key ON memory(key);
             CREATE INDEX IF NOT EXISTS idx_memory_expires_at ON memory(expires_at);
             CREATE INDEX IF NOT EXISTS idx_memory_created_at ON memory(created_at);",
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn upsert(
        &self,
        key: &str,
        data: &Value,
        metadata: Option<&Value>,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<MemoryRecord> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let data_json = data.to_string();
        let metadata_json = metadata.map(|m| m.to_string());
        let expires_json = expires_at.map(|t| t.to_rfc3339());

        conn.execute(
            "INSERT INTO memory (key, data, metadata, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                metadata = excluded.metadata,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![key, data_json, metadata_json, expires_json, now],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        self.get_locked(&conn, key)?
            .ok_or_else(|| Error::Storage("upsert did not persist a row".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
        let data_str: String = row.get("data")?;
        let metadata_str: Option<String> = row.get("metadata")?;
        Ok(MemoryRecord {
            key: row.get("key")?,
            data: serde_json::from_str(&data_str).unwrap_or(Value::Null),
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn get_locked(&self, conn: &Connection, key: &str) -> Result<Option<MemoryRecord>> {
        conn.query_row(
            "SELECT key, data, metadata, expires_at, created_at, updated_at FROM memory WHERE key = ?1",
            params![key],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| Error::Storage(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();
        self.get_locked(&conn, key)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memory WHERE key = ?1", params![key])
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memory", [])
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{query}%");
        let mut stmt = conn
            .prepare(
                "SELECT key, data, metadata, expires_at, created_at, updated_at FROM memory
                 WHERE key LIKE ?1 OR data LIKE ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], Self::row_to_record)
            .map_err(|e| Error::Storage(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(e.to_string()))
    }

    pub fn delete_expired(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                "DELETE FROM memory WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(deleted as u64)
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory", [], |r| r.get(0))
            .map_err(|e| Error::Storage(e.to_string()))?;
        let expired: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memory WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![Utc::now().to_rfc3339()],
                |r| r.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(MemoryStats {
            total_records: total,
            expired_records: expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_then_get() {
        let storage = SqliteMemoryStorage::in_memory().unwrap();
        storage.upsert("k", &json!(1), None, None).unwrap();
        let record = storage.get("k").unwrap().unwrap();
        assert_eq!(record.data, json!(1));
    }

    #[test]
    fn upsert_is_idempotent_on_key() {
        let storage = SqliteMemoryStorage::in_memory().unwrap();
        storage.upsert("k", &json!(1), None, None).unwrap();
        storage.upsert("k", &json!(2), None, None).unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_records, 1);
    }
}
