//! Dedup ledger — durable record of which message ids already produced a
//! ticket.
//!
//! This is the at-most-once backbone of the whole system: for any message
//! id, at most one ticket is ever emitted across the ledger's lifetime,
//! process restarts included. The interface is deliberately narrow
//! (`has`/`record`) so the backing store can be swapped without touching
//! the pipeline.

pub mod libsql_backend;

pub use libsql_backend::LibSqlLedger;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::LedgerError;

/// One ledger entry. Appended on successful ticket emission, never updated
/// or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub message_id: String,
    pub ticket_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Durable message-id ledger.
///
/// `has` must be safe under concurrent readers; `record` is idempotent —
/// recording an already-present id is a no-op (protects a retried cycle
/// from double-emitting).
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn has(&self, message_id: &str) -> Result<bool, LedgerError>;

    async fn record(&self, message_id: &str, ticket_id: &str) -> Result<(), LedgerError>;
}

// ── In-memory backend ───────────────────────────────────────────────

/// Non-durable ledger for tests. An in-memory set does not survive
/// restarts, so it is never the production default.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<String, DedupEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries, for assertions.
    pub fn entries(&self) -> Vec<DedupEntry> {
        self.entries
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn has(&self, message_id: &str) -> Result<bool, LedgerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Query(e.to_string()))?;
        Ok(entries.contains_key(message_id))
    }

    async fn record(&self, message_id: &str, ticket_id: &str) -> Result<(), LedgerError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Write(e.to_string()))?;
        entries
            .entry(message_id.to_string())
            .or_insert_with(|| DedupEntry {
                message_id: message_id.to_string(),
                ticket_id: ticket_id.to_string(),
                processed_at: Utc::now(),
            });
        Ok(())
    }
}

/// Test double that fails every call — exercises the fatal path.
#[cfg(test)]
pub(crate) struct FailingLedger;

#[cfg(test)]
#[async_trait]
impl DedupLedger for FailingLedger {
    async fn has(&self, _message_id: &str) -> Result<bool, LedgerError> {
        Err(LedgerError::Query("ledger store unreachable".into()))
    }

    async fn record(&self, _message_id: &str, _ticket_id: &str) -> Result<(), LedgerError> {
        Err(LedgerError::Write("ledger store unreachable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_has() {
        let ledger = MemoryLedger::new();
        assert!(!ledger.has("m1").await.unwrap());
        ledger.record("m1", "TKT-1").await.unwrap();
        assert!(ledger.has("m1").await.unwrap());
        assert!(!ledger.has("m2").await.unwrap());
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let ledger = MemoryLedger::new();
        ledger.record("m1", "TKT-1").await.unwrap();
        ledger.record("m1", "TKT-2").await.unwrap();

        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        // First write wins; the retried record is a no-op.
        assert_eq!(entries[0].ticket_id, "TKT-1");
    }

    #[tokio::test]
    async fn concurrent_reads_and_writes() {
        use std::sync::Arc;

        let ledger = Arc::new(MemoryLedger::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let id = format!("m{}", i % 4);
                ledger.record(&id, &format!("TKT-{i}")).await.unwrap();
                ledger.has(&id).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(ledger.len(), 4);
    }
}
