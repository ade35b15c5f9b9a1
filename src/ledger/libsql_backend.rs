//! libSQL ledger backend — durable `DedupLedger` over a local database file.
//!
//! A single connection is reused for all operations; `libsql::Connection`
//! is `Send + Sync` and safe for concurrent async use, which gives the
//! ledger its concurrent-read / serialized-write discipline for free.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::DedupLedger;

/// Durable dedup ledger backed by libSQL.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLedger {
    /// Open (or create) a local ledger file.
    pub async fn new_local(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Open(format!("create ledger directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LedgerError::Open(format!("open ledger database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| LedgerError::Open(format!("connect to ledger: {e}")))?;

        let ledger = Self {
            db: Arc::new(db),
            conn,
        };
        ledger.init_schema().await?;
        info!(path = %path.display(), "Dedup ledger opened");
        Ok(ledger)
    }

    /// In-memory ledger database (for tests).
    pub async fn new_memory() -> Result<Self, LedgerError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| LedgerError::Open(format!("open in-memory ledger: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| LedgerError::Open(format!("connect to ledger: {e}")))?;

        let ledger = Self {
            db: Arc::new(db),
            conn,
        };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS processed_messages (
                    message_id   TEXT PRIMARY KEY,
                    ticket_id    TEXT NOT NULL,
                    processed_at TEXT NOT NULL
                )",
                (),
            )
            .await
            .map_err(|e| LedgerError::Open(format!("create ledger schema: {e}")))?;
        Ok(())
    }

    /// Number of recorded entries.
    pub async fn count(&self) -> Result<u64, LedgerError> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM processed_messages", ())
            .await
            .map_err(|e| LedgerError::Query(e.to_string()))?;
        let row = rows
            .next()
            .await
            .map_err(|e| LedgerError::Query(e.to_string()))?
            .ok_or_else(|| LedgerError::Query("count returned no row".into()))?;
        let count: i64 = row.get(0).map_err(|e| LedgerError::Query(e.to_string()))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl DedupLedger for LibSqlLedger {
    async fn has(&self, message_id: &str) -> Result<bool, LedgerError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM processed_messages WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| LedgerError::Query(e.to_string()))?;
        let found = rows
            .next()
            .await
            .map_err(|e| LedgerError::Query(e.to_string()))?
            .is_some();
        Ok(found)
    }

    async fn record(&self, message_id: &str, ticket_id: &str) -> Result<(), LedgerError> {
        // INSERT OR IGNORE keeps record idempotent: the first write for a
        // message id wins, retried cycles are no-ops.
        self.conn
            .execute(
                "INSERT OR IGNORE INTO processed_messages (message_id, ticket_id, processed_at)
                 VALUES (?1, ?2, ?3)",
                params![message_id, ticket_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| LedgerError::Write(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_has() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        assert!(!ledger.has("m1").await.unwrap());
        ledger.record("m1", "TKT-1").await.unwrap();
        assert!(ledger.has("m1").await.unwrap());
        assert_eq!(ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let ledger = LibSqlLedger::new_memory().await.unwrap();
        ledger.record("m1", "TKT-1").await.unwrap();
        ledger.record("m1", "TKT-9").await.unwrap();
        assert_eq!(ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let ledger = LibSqlLedger::new_local(&path).await.unwrap();
            ledger.record("m1", "TKT-1").await.unwrap();
            ledger.record("m2", "TKT-2").await.unwrap();
        }

        let reopened = LibSqlLedger::new_local(&path).await.unwrap();
        assert!(reopened.has("m1").await.unwrap());
        assert!(reopened.has("m2").await.unwrap());
        assert!(!reopened.has("m3").await.unwrap());
        assert_eq!(reopened.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_records_serialize() {
        use std::sync::Arc;

        let ledger = Arc::new(LibSqlLedger::new_memory().await.unwrap());
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.record("same-id", &format!("TKT-{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.count().await.unwrap(), 1);
    }
}
