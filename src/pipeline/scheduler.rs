//! Cycle scheduler — fetches a batch, runs the pipeline, marks handled
//! messages processed at the source.
//!
//! This is the pipeline's caller: cycles are serialized (each run is
//! awaited before the next tick) and only `Created` / `SkippedDuplicate`
//! outcomes are marked processed — failed messages stay visible at the
//! source so a later cycle retries them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::notify::{Notifier, NotifyEvent};
use crate::pipeline::runner::IngestionPipeline;
use crate::pipeline::types::{PipelineReport, RunOptions};
use crate::source::MailSource;

/// One mailbox's fetch → run → mark loop.
pub struct CycleRunner {
    pipeline: Arc<IngestionPipeline>,
    source: Arc<dyn MailSource>,
    notifier: Arc<Notifier>,
    /// Messages fetched per cycle.
    fetch_limit: usize,
}

impl CycleRunner {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        source: Arc<dyn MailSource>,
        notifier: Arc<Notifier>,
        fetch_limit: usize,
    ) -> Self {
        Self {
            pipeline,
            source,
            notifier,
            fetch_limit,
        }
    }

    /// Run a single cycle.
    pub async fn run_once(&self, options: &RunOptions) -> Result<PipelineReport, PipelineError> {
        let batch = match self.source.fetch(self.fetch_limit).await {
            Ok(batch) => batch,
            Err(err) => {
                error!(error = %err, "Mail source fetch failed");
                self.notifier
                    .publish(NotifyEvent::CycleFailed {
                        cycle_id: Uuid::new_v4(),
                        reason: err.to_string(),
                    })
                    .await;
                return Err(err.into());
            }
        };

        let report = self.pipeline.run(batch, options).await?;

        // Dry-run produces no `Created`/`Skipped` outcomes, so nothing is
        // ever marked processed in test mode.
        for outcome in &report.outcomes {
            if outcome.status.marks_processed()
                && let Err(err) = self.source.mark_processed(&outcome.source_id).await
            {
                warn!(
                    source_id = %outcome.source_id,
                    error = %err,
                    "Failed to mark message processed"
                );
            }
        }

        Ok(report)
    }
}

/// Spawn the polling loop: one cycle per interval, cooperatively stoppable.
///
/// Returns a `JoinHandle` and a shutdown flag. Setting the flag stops the
/// loop at the next tick; the in-progress cycle completes first.
pub fn spawn_cycle_loop(
    runner: Arc<CycleRunner>,
    options: RunOptions,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Cycle loop started");

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Cycle loop shutting down");
                return;
            }

            match runner.run_once(&options).await {
                Ok(report) => {
                    if !report.outcomes.is_empty() || report.deferred > 0 {
                        info!(
                            created = report.created(),
                            skipped = report.skipped(),
                            failed = report.failed_retryable() + report.failed_permanent(),
                            "Cycle complete"
                        );
                    }
                }
                Err(err) => {
                    // Already notified; keep polling, the next cycle may recover.
                    error!(error = %err, "Cycle failed");
                }
            }
        }
    });

    (handle, shutdown_flag)
}
