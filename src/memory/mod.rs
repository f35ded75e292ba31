//! Memory store (C4).
//!
//! Durable keyed map with a write-through cache. Grounded in the model
//! crate's `memory::storage::ltm_sqlite_storage::LTMSQLiteStorage`
//! (synchronous `rusqlite::Connection` wrapped in `spawn_blocking` for async
//! call sites), generalized to a schema with a unique key, nullable
//! expiry, substring search over key+data) and write-through-cache
//! invariants.

pub mod storage;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use storage::SqliteMemoryStorage;

/// One row returned from `search`/`recall` (`MemoryRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub data: Value,
    pub metadata: Option<Value>,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MemoryRecord {
    fn is_expired(&self) -> bool {
        match &self.expires_at {
            Some(ts) => chrono::DateTime::parse_from_rfc3339(ts)
                .map(|t| t < Utc::now())
                .unwrap_or(false),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_records: i64,
    pub expired_records: i64,
}

/// Cache-through layer over [`SqliteMemoryStorage`].
pub struct Memory {
    storage: Arc<SqliteMemoryStorage>,
    cache: DashMap<String, MemoryRecord>,
}

impl Memory {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            storage: Arc::new(SqliteMemoryStorage::open(path)?),
            cache: DashMap::new(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            storage: Arc::new(SqliteMemoryStorage::in_memory()?),
            cache: DashMap::new(),
        })
    }

    /// `store(key, data, metadata?)` — upsert on the unique key. Durable is
    /// updated before cache (invariant iii).
    pub fn store(&self, key: &str, data: Value, metadata: Option<Value>) -> Result<()> {
        self.store_with_ttl(key, data, metadata, None)
    }

    pub fn store_with_ttl(
        &self,
        key: &str,
        data: Value,
        metadata: Option<Value>,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let record = self.storage.upsert(key, &data, metadata.as_ref(), expires_at)?;
        self.cache.insert(key.to_string(), record);
        Ok(())
    }

    pub async fn astore(&self, key: String, data: Value, metadata: Option<Value>) -> Result<()> {
        let storage = self.storage.clone();
        let record = tokio::task::spawn_blocking(move || storage.upsert(&key, &data, metadata.as_ref(), None))
            .await
            .map_err(|e| crate::error::Error::Storage(e.to_string()))??;
        self.cache.insert(record.key.clone(), record);
        Ok(())
    }

    /// `recall(key) -> data?` — never returns an expired record (invariant i).
    pub fn recall(&self, key: &str) -> Result<Option<Value>> {
        if let Some(entry) = self.cache.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.cache.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }
        match self.storage.get(key)? {
            Some(record) if record.is_expired() => {
                self.storage.delete(key)?;
                Ok(None)
            }
            Some(record) => {
                let data = record.data.clone();
                self.cache.insert(key.to_string(), record);
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.recall(key)?.is_some())
    }

    /// `search(query, limit)` — substring match over key and serialized
    /// data, respecting expiry (invariant v).
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let all = self.storage.search(query, limit)?;
        Ok(all.into_iter().filter(|r| !r.is_expired()).collect())
    }

    /// `forget(key)` — invalidates both cache and durable store.
    pub fn forget(&self, key: &str) -> Result<()> {
        self.storage.delete(key)?;
        self.cache.remove(key);
        Ok(())
    }

    /// `clear()` — purges everything, enumerating cache keys in batches of
    /// at most 1000 (the cache here supports direct `clear`, but the
    /// batching behavior is preserved for any future tag-less backend).
    pub fn clear(&self) -> Result<()> {
        self.storage.clear()?;
        let keys: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        for chunk in keys.chunks(1000) {
            for k in chunk {
                self.cache.remove(k);
            }
        }
        Ok(())
    }

    pub fn get_stats(&self) -> Result<MemoryStats> {
        self.storage.stats()
    }

    /// `cleanup()` — delete expired rows; returns the count deleted (Open
    /// Question 1's resolution: `u64`).
    pub fn cleanup(&self) -> Result<u64> {
        let deleted = self.storage.delete_expired()?;
        self.cache.retain(|_, v| !v.is_expired());
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_then_recall_roundtrips() {
        let mem = Memory::in_memory().unwrap();
        mem.store("k1", json!({"a": 1}), None).unwrap();
        assert_eq!(mem.recall("k1").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn recall_unseen_key_is_null() {
        let mem = Memory::in_memory().unwrap();
        assert_eq!(mem.recall("nope").unwrap(), None);
    }

    #[test]
    fn store_is_upsert() {
        let mem = Memory::in_memory().unwrap();
        mem.store("k1", json!("first"), None).unwrap();
        mem.store("k1", json!("second"), None).unwrap();
        assert_eq!(mem.recall("k1").unwrap(), Some(json!("second")));
    }

    #[test]
    fn expired_record_is_absent() {
        let mem = Memory::in_memory().unwrap();
        let past = Utc::now() - chrono::Duration::seconds(10);
        mem.store_with_ttl("k1", json!("v"), None, Some(past)).unwrap();
        assert_eq!(mem.recall("k1").unwrap(), None);
    }

    #[test]
    fn clear_then_recall_is_null_for_any_prior_key() {
        let mem = Memory::in_memory().unwrap();
        mem.store("a", json!(1), None).unwrap();
        mem.store("b", json!(2), None).unwrap();
        mem.clear().unwrap();
        assert_eq!(mem.recall("a").unwrap(), None);
        assert_eq!(mem.recall("b").unwrap(), None);
    }

    #[test]
    fn forget_invalidates_both_layers() {
        let mem = Memory::in_memory().unwrap();
        mem.store("k", json!(1), None).unwrap();
        mem.recall("k").unwrap(); // populate cache
        mem.forget("k").unwrap();
        assert_eq!(mem.recall("k").unwrap(), None);
    }

    #[test]
    fn search_matches_key_and_data_substring() {
        let mem = Memory::in_memory().unwrap();
        mem.store("agent_memory_writer", json!("hello world"), None).unwrap();
        mem.store("other", json!("nothing relevant"), None).unwrap();
        let results = mem.search("writer", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "agent_memory_writer");
    }
}
