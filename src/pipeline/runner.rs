//! Ingestion pipeline — raw messages in, ticket records and a cycle report
//! out.
//!
//! Per message: normalize → dedup check → analyze → emit → record.
//! Per-message trouble never interrupts sibling messages; only an
//! unreachable ledger aborts the cycle. The ledger is written strictly
//! after the sink acknowledged the ticket, so a crash can at worst cause a
//! redelivery (caught as duplicate next cycle), never a lost record.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{Analysis, AnalyzeInput, TicketAnalyzer};
use crate::config::{PipelineConfig, Taxonomy};
use crate::error::PipelineError;
use crate::ledger::DedupLedger;
use crate::normalize::normalize;
use crate::notify::{Notifier, NotifyEvent};
use crate::pipeline::types::{
    InboundMessage, MessageOutcome, OutcomeStatus, PipelineReport, RunOptions, TicketRecord,
    TicketStatus,
};
use crate::sink::TicketSink;
use crate::source::RawMessage;

/// The ingestion pipeline. One instance per mailbox; callers serialize
/// cycles (the pipeline is not re-entrant against its ledger).
pub struct IngestionPipeline {
    analyzer: Arc<dyn TicketAnalyzer>,
    ledger: Arc<dyn DedupLedger>,
    sink: Arc<dyn TicketSink>,
    notifier: Arc<Notifier>,
    taxonomy: Taxonomy,
    config: PipelineConfig,
    sequence: AtomicU64,
}

impl IngestionPipeline {
    pub fn new(
        analyzer: Arc<dyn TicketAnalyzer>,
        ledger: Arc<dyn DedupLedger>,
        sink: Arc<dyn TicketSink>,
        notifier: Arc<Notifier>,
        taxonomy: Taxonomy,
        config: PipelineConfig,
    ) -> Self {
        Self {
            analyzer,
            ledger,
            sink,
            notifier,
            taxonomy,
            config,
            sequence: AtomicU64::new(0),
        }
    }

    /// Run one cycle over a batch of raw messages.
    ///
    /// Outcomes preserve arrival order. Messages beyond the batch bound (or
    /// cut off by the stop signal) are deferred to the next cycle. Returns
    /// `Err` only on infrastructure failure (ledger unreachable).
    pub async fn run(
        &self,
        batch: Vec<RawMessage>,
        options: &RunOptions,
    ) -> Result<PipelineReport, PipelineError> {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = batch.len();

        let bound = options.max_batch_size.unwrap_or(self.config.max_batch_size);
        let mut work = batch;
        work.truncate(bound);

        info!(
            cycle = %cycle_id,
            batch = work.len(),
            deferred = total - work.len(),
            dry_run = options.dry_run,
            "Cycle started"
        );

        let stop = Arc::clone(&options.stop);
        let result: Result<Vec<MessageOutcome>, PipelineError> = stream::iter(work)
            .take_while(|_| {
                let keep_going = !stop.load(Ordering::Relaxed);
                async move { keep_going }
            })
            .map(|raw| self.process_message(raw, options))
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await;

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(cycle = %cycle_id, error = %err, "Cycle failed");
                self.notifier
                    .publish(NotifyEvent::CycleFailed {
                        cycle_id,
                        reason: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        };

        let report = PipelineReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            deferred: total - outcomes.len(),
            outcomes,
        };

        info!(
            cycle = %cycle_id,
            created = report.created(),
            skipped = report.skipped(),
            failed_retryable = report.failed_retryable(),
            failed_permanent = report.failed_permanent(),
            deferred = report.deferred,
            "Cycle finished"
        );

        Ok(report)
    }

    async fn process_message(
        &self,
        raw: RawMessage,
        options: &RunOptions,
    ) -> Result<MessageOutcome, PipelineError> {
        let message = normalize(&raw);
        let source_id = raw.id;
        let message_id = message.message_id.clone();
        debug!(message_id = %message_id, sender = %message.sender_email, "Processing message");

        // Dedup before any provider call: duplicates cost nothing.
        if self.ledger.has(&message_id).await? {
            debug!(message_id = %message_id, "Duplicate, skipping");
            return Ok(MessageOutcome {
                message_id,
                source_id,
                status: OutcomeStatus::SkippedDuplicate,
            });
        }

        // Analysis is total — no failure path from here to record-building.
        let analysis = self
            .analyzer
            .analyze(AnalyzeInput {
                subject: &message.subject,
                body: &message.body_text,
                sender_email: &message.sender_email,
            })
            .await;

        let record = self.build_ticket(&message, &analysis);

        if options.dry_run {
            debug!(message_id = %message_id, ticket = %record.id, "Dry-run, would create");
            return Ok(MessageOutcome {
                message_id,
                source_id,
                status: OutcomeStatus::WouldCreate { ticket_id: record.id },
            });
        }

        let submit = tokio::time::timeout(self.config.sink_timeout, self.sink.submit(&record));
        let ticket_id = match submit.await {
            Err(_elapsed) => {
                warn!(message_id = %message_id, "Sink write timed out");
                return Ok(MessageOutcome {
                    message_id,
                    source_id,
                    status: OutcomeStatus::Failed {
                        retryable: true,
                        reason: "sink write timed out".into(),
                    },
                });
            }
            Ok(Err(err)) => {
                warn!(message_id = %message_id, error = %err, "Sink rejected ticket");
                return Ok(MessageOutcome {
                    message_id,
                    source_id,
                    status: OutcomeStatus::Failed {
                        retryable: err.is_transient(),
                        reason: err.to_string(),
                    },
                });
            }
            Ok(Ok(ticket_id)) => ticket_id,
        };

        // Durability precedes acknowledgment: the ledger write must land
        // before this message is reported created.
        self.ledger.record(&message_id, &ticket_id).await?;

        if self.is_critical(&record.priority) {
            self.notifier
                .publish(NotifyEvent::TicketCreatedCritical {
                    ticket: record.clone(),
                })
                .await;
        }

        info!(
            message_id = %message_id,
            ticket = %ticket_id,
            category = %record.category,
            priority = %record.priority,
            "Ticket created"
        );

        Ok(MessageOutcome {
            message_id,
            source_id,
            status: OutcomeStatus::Created { ticket_id },
        })
    }

    fn build_ticket(&self, message: &InboundMessage, analysis: &Analysis) -> TicketRecord {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("TKT-{}-{:04}", Utc::now().format("%Y%m%d"), sequence);

        let mut description = excerpt(
            &message.body_text,
            self.config.description_excerpt_chars,
        );
        let digest_lines = analysis.digest.description_lines();
        if !digest_lines.is_empty() {
            if !description.is_empty() {
                description.push_str("\n\n");
            }
            description.push_str(&digest_lines.join("\n"));
        }

        TicketRecord {
            id,
            message_id: message.message_id.clone(),
            received_at: message.received_at,
            sender_name: message.sender_name.clone(),
            sender_email: message.sender_email.clone(),
            subject: message.subject.clone(),
            category: analysis.classification.category.clone(),
            priority: analysis.classification.priority.clone(),
            status: TicketStatus::New,
            description,
            assigned_to: None,
            notes: None,
        }
    }

    /// Highest configured priority is the alerting one.
    fn is_critical(&self, priority: &str) -> bool {
        self.taxonomy
            .priorities()
            .first()
            .is_some_and(|highest| highest == priority)
    }
}

/// Char-bounded excerpt with collapsed whitespace edges.
fn excerpt(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    let mut taken: String = trimmed.chars().take(max_chars).collect();
    if taken.len() < trimmed.len() {
        taken.push('…');
    }
    taken
}
