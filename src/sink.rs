//! Ticket sink boundary — where finished `TicketRecord`s go.
//!
//! Failures are tagged transient/permanent (`SinkError`); the pipeline
//! translates them into retryable/permanent outcomes and only records a
//! message in the dedup ledger after the sink acknowledged it.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::pipeline::types::TicketRecord;

/// Destination for emitted tickets.
///
/// Returns the sink-assigned ticket id on success (a sink may keep the
/// pipeline-assigned id or mint its own; the ledger stores whatever comes
/// back).
#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn submit(&self, record: &TicketRecord) -> Result<String, SinkError>;
}

// ── Webhook sink ────────────────────────────────────────────────────

/// HTTP sink: POSTs each ticket as JSON to a configured endpoint.
///
/// Stands in for the spreadsheet writer at the same boundary. 5xx and 429
/// responses and transport errors are transient; other 4xx responses mean
/// the record itself was rejected and are permanent.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TicketSink for WebhookSink {
    async fn submit(&self, record: &TicketRecord) -> Result<String, SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(|e| SinkError::Transient(format!("ticket webhook unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            // The endpoint may assign its own id; fall back to ours.
            let ticket_id = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("ticket_id").and_then(|id| id.as_str().map(String::from)))
                .unwrap_or_else(|| record.id.clone());
            info!(ticket_id = %ticket_id, "Ticket submitted");
            return Ok(ticket_id);
        }

        let reason = format!("ticket webhook returned {status}");
        if status.is_server_error() || status.as_u16() == 429 {
            Err(SinkError::Transient(reason))
        } else {
            Err(SinkError::Permanent(reason))
        }
    }
}

// ── In-memory sink ──────────────────────────────────────────────────

/// In-memory sink for tests and dry-run inspection. Failure injection is
/// keyed by `message_id`.
#[derive(Default)]
pub struct MemorySink {
    submitted: Mutex<Vec<TicketRecord>>,
    transient_failures: Mutex<HashSet<String>>,
    permanent_failures: Mutex<HashSet<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `submit` fail transiently for this message id.
    pub fn fail_transient(&self, message_id: &str) {
        if let Ok(mut set) = self.transient_failures.lock() {
            set.insert(message_id.to_string());
        }
    }

    /// Make `submit` fail permanently for this message id.
    pub fn fail_permanent(&self, message_id: &str) {
        if let Ok(mut set) = self.permanent_failures.lock() {
            set.insert(message_id.to_string());
        }
    }

    /// Stop failing for this message id (simulates recovery).
    pub fn clear_failure(&self, message_id: &str) {
        if let Ok(mut set) = self.transient_failures.lock() {
            set.remove(message_id);
        }
        if let Ok(mut set) = self.permanent_failures.lock() {
            set.remove(message_id);
        }
    }

    /// Snapshot of accepted tickets.
    pub fn submitted(&self) -> Vec<TicketRecord> {
        self.submitted
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.submitted.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TicketSink for MemorySink {
    async fn submit(&self, record: &TicketRecord) -> Result<String, SinkError> {
        if self
            .transient_failures
            .lock()
            .is_ok_and(|set| set.contains(&record.message_id))
        {
            return Err(SinkError::Transient("injected transient failure".into()));
        }
        if self
            .permanent_failures
            .lock()
            .is_ok_and(|set| set.contains(&record.message_id))
        {
            return Err(SinkError::Permanent("injected permanent failure".into()));
        }

        let ticket_id = record.id.clone();
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(record.clone());
        }
        debug!(ticket_id = %ticket_id, "Ticket accepted by memory sink");
        Ok(ticket_id)
    }
}
