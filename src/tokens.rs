//! Token-usage tracker (C5).
//!
//! Append-only SQLite table, grounded in the model crate's
//! `memory::storage::ltm_sqlite_storage::LTMSQLiteStorage` pattern: a
//! synchronous `rusqlite::Connection` guarded by a mutex, wrapped in
//! `tokio::task::spawn_blocking` for the async entry points used elsewhere
//! in the crate.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One append-only row (`TokenUsageRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub id: i64,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost: Option<f64>,
    pub metadata: Option<Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsageSummary {
    pub monthly_tokens: i64,
    pub monthly_requests: i64,
    pub avg_tokens_per_request: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStatsRow {
    pub provider: String,
    pub model: String,
    pub total_tokens: i64,
    pub requests: i64,
}

pub struct TokenUsageTracker {
    conn: Arc<Mutex<Connection>>,
}

impl TokenUsageTracker {
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
            "CREATE TABLE IF NOT EXISTS token_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost REAL,
                metadata TEXT,
                created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_token_usage_provider_model_created
                ON token_usage(provider, model, created_at);",
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    /// `track(provider, model, prompt, completion, cost?, metadata?)` —
    /// writes exactly one row.
    pub fn track(
        &self,
        provider: &str,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        cost: Option<f64>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let total = prompt_tokens + completion_tokens;
        let metadata_json = metadata.map(|v| v.to_string());
        conn.execute(
            "INSERT INTO token_usage
                (provider, model, prompt_tokens, completion_tokens, total_tokens, cost, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                provider,
                model,
                prompt_tokens,
                completion_tokens,
                total,
                cost,
                metadata_json,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn atrack(
        &self,
        provider: String,
        model: String,
        prompt_tokens: i64,
        completion_tokens: i64,
        cost: Option<f64>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let this = TokenUsageTracker { conn };
            this.track(&provider, &model, prompt_tokens, completion_tokens, cost, metadata)
        })
        .await
        .map_err(|e| Error::Storage(e.to_string()))?
    }

    pub fn get_summary(&self) -> Result<UsageSummary> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT COALESCE(SUM(total_tokens), 0), COUNT(*)
                 FROM token_usage
                 WHERE created_at >= datetime('now', '-30 days')",
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let (tokens, requests): (i64, i64) = stmt
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| Error::Storage(e.to_string()))?;
        let avg = if requests > 0 {
            tokens as f64 / requests as f64
        } else {
            0.0
        };
        Ok(UsageSummary {
            monthly_tokens: tokens,
            monthly_requests: requests,
            avg_tokens_per_request: avg,
        })
    }

    /// `getStats(provider?, model?, days?)` — grouped rows.
    pub fn get_stats(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        days: Option<i64>,
    ) -> Result<Vec<UsageStatsRow>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT provider, model, COALESCE(SUM(total_tokens),0), COUNT(*)
             FROM token_usage WHERE 1=1",
        );
        // Bind values are pushed in lockstep with each placeholder appended
        // above, so `sql`'s placeholder count always matches `bind_params`'s
        // length regardless of which filters are present.
        let mut bind_params: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(p) = &provider {
            sql.push_str(" AND provider = ?");
            bind_params.push(p);
        }
        if let Some(m) = &model {
            sql.push_str(" AND model = ?");
            bind_params.push(m);
        }
        if let Some(d) = days {
            sql.push_str(&format!(" AND created_at >= datetime('now', '-{d} days')"));
        }
        sql.push_str(" GROUP BY provider, model");
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(bind_params.as_slice(), |row| {
                Ok(UsageStatsRow {
                    provider: row.get(0)?,
                    model: row.get(1)?,
                    total_tokens: row.get(2)?,
                    requests: row.get(3)?,
                })
            })
            .map_err(|e| Error::Storage(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(e.to_string()))
    }

    /// `cleanup(days)` — deletes rows older than `days`; returns the count
    /// deleted (Open Question 1's resolution: `u64`).
    pub fn cleanup(&self, days: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                &format!("DELETE FROM token_usage WHERE created_at < datetime('now', '-{days} days')"),
                [],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(deleted as u64)
    }
}
