//! Shared types for the ingestion pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Inbound message ─────────────────────────────────────────────────

/// Canonical inbound message, one per physical e-mail.
///
/// Produced by the normalizer from a raw transport message. Immutable once
/// built. `message_id` is never empty: when the transport supplies none,
/// the normalizer synthesizes a stable content hash so dedup keys survive
/// re-fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport-assigned identity (or synthesized hash).
    pub message_id: String,
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    /// Plain-text body; derived from HTML when no text part exists.
    pub body_text: String,
    /// Original HTML part, retained when present.
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
    pub attachments: Vec<AttachmentMeta>,
    /// Header map, first value wins. Content is never read from attachments.
    pub headers: BTreeMap<String, String>,
}

/// Attachment metadata. The pipeline never reads attachment content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

// ── Ticket record ───────────────────────────────────────────────────

/// Ticket lifecycle status. The pipeline only ever emits `New`; later
/// transitions belong to external ticket management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    InProgress,
    Resolved,
}

/// The pipeline's output unit, one per non-duplicate inbound message.
/// Write-once: never mutated by the pipeline after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Pipeline-assigned id, `TKT-<date>-<sequence>`.
    pub id: String,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    pub category: String,
    pub priority: String,
    pub status: TicketStatus,
    /// Body excerpt plus extraction digest lines.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ── Run options ─────────────────────────────────────────────────────

/// Per-run options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Side-effect-free mode: no sink writes, no ledger writes.
    pub dry_run: bool,
    /// Override of the configured batch bound for this run.
    pub max_batch_size: Option<usize>,
    /// Cooperative stop signal, checked between messages. In-flight
    /// per-message work completes; undispatched messages are deferred.
    pub stop: Arc<AtomicBool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_batch_size: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl RunOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

// ── Outcomes & report ───────────────────────────────────────────────

/// Per-message processing outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Ticket durably emitted and recorded in the ledger.
    Created { ticket_id: String },
    /// Dry-run: the ticket that would have been emitted.
    WouldCreate { ticket_id: String },
    /// Message id already present in the ledger.
    SkippedDuplicate,
    /// Sink rejected the ticket; ledger untouched either way.
    Failed { retryable: bool, reason: String },
}

impl OutcomeStatus {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::WouldCreate { .. } => "would_create",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::Failed { retryable: true, .. } => "failed_retryable",
            Self::Failed { retryable: false, .. } => "failed_permanent",
        }
    }

    /// Whether the caller should mark the message processed at the source.
    /// Failed messages stay visible so a later cycle retries them.
    pub fn marks_processed(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::SkippedDuplicate)
    }
}

/// Outcome for one message, in arrival order.
#[derive(Debug, Clone)]
pub struct MessageOutcome {
    /// Normalized message identity (dedup key).
    pub message_id: String,
    /// Transport-level handle, for marking the message processed at the
    /// source.
    pub source_id: String,
    pub status: OutcomeStatus,
}

/// Result of one run-cycle.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Per-message outcomes, preserving arrival order.
    pub outcomes: Vec<MessageOutcome>,
    /// Messages beyond the batch bound (or cut off by the stop signal),
    /// left for the next cycle.
    pub deferred: usize,
}

impl PipelineReport {
    pub fn created(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Created { .. }))
    }

    pub fn would_create(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::WouldCreate { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::SkippedDuplicate))
    }

    pub fn failed_retryable(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Failed { retryable: true, .. }))
    }

    pub fn failed_permanent(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Failed { retryable: false, .. }))
    }

    fn count(&self, pred: impl Fn(&OutcomeStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: OutcomeStatus) -> MessageOutcome {
        MessageOutcome {
            message_id: "m".into(),
            source_id: "spool-m".into(),
            status,
        }
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(
            OutcomeStatus::Created { ticket_id: "t".into() }.label(),
            "created"
        );
        assert_eq!(OutcomeStatus::SkippedDuplicate.label(), "skipped_duplicate");
        assert_eq!(
            OutcomeStatus::Failed { retryable: true, reason: "x".into() }.label(),
            "failed_retryable"
        );
        assert_eq!(
            OutcomeStatus::Failed { retryable: false, reason: "x".into() }.label(),
            "failed_permanent"
        );
    }

    #[test]
    fn only_created_and_skipped_mark_processed() {
        assert!(OutcomeStatus::Created { ticket_id: "t".into() }.marks_processed());
        assert!(OutcomeStatus::SkippedDuplicate.marks_processed());
        assert!(!OutcomeStatus::WouldCreate { ticket_id: "t".into() }.marks_processed());
        assert!(
            !OutcomeStatus::Failed { retryable: true, reason: "x".into() }.marks_processed()
        );
    }

    #[test]
    fn report_counts() {
        let report = PipelineReport {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![
                outcome(OutcomeStatus::Created { ticket_id: "a".into() }),
                outcome(OutcomeStatus::Created { ticket_id: "b".into() }),
                outcome(OutcomeStatus::SkippedDuplicate),
                outcome(OutcomeStatus::Failed { retryable: true, reason: "503".into() }),
                outcome(OutcomeStatus::Failed { retryable: false, reason: "bad".into() }),
            ],
            deferred: 3,
        };
        assert_eq!(report.created(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed_retryable(), 1);
        assert_eq!(report.failed_permanent(), 1);
        assert_eq!(report.would_create(), 0);
        assert_eq!(report.deferred, 3);
    }

    #[test]
    fn ticket_record_serialization_omits_none_fields() {
        let record = TicketRecord {
            id: "TKT-20250101-0001".into(),
            message_id: "<m1@example.com>".into(),
            received_at: Utc::now(),
            sender_name: "Alice".into(),
            sender_email: "alice@example.com".into(),
            subject: "Panne serveur".into(),
            category: "Technique".into(),
            priority: "Critique".into(),
            status: TicketStatus::New,
            description: "Le serveur ne répond plus".into(),
            assigned_to: None,
            notes: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "new");
        assert!(json.get("assigned_to").is_none());
        assert!(json.get("notes").is_none());
    }
}
