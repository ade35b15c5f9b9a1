use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ticket_triage::classify::{KeywordClassifier, KeywordRules, LlmAnalyzer, TicketAnalyzer};
use ticket_triage::config::{LlmSettings, NotifyConfig, PipelineConfig, Taxonomy};
use ticket_triage::ledger::{DedupLedger, LibSqlLedger};
use ticket_triage::llm::create_provider;
use ticket_triage::notify::Notifier;
use ticket_triage::pipeline::{CycleRunner, IngestionPipeline, RunOptions, spawn_cycle_loop};
use ticket_triage::sink::{MemorySink, TicketSink, WebhookSink};
use ticket_triage::source::MaildirSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Console + daily rolling file, like the original deployment's logging.
    let file_appender = tracing_appender::rolling::daily("logs", "ticket-triage.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    let dry_run = env_flag("TRIAGE_DRY_RUN");
    let mode = std::env::var("TRIAGE_MODE").unwrap_or_else(|_| "once".to_string());

    eprintln!("📬 ticket-triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {mode}{}", if dry_run { " (dry-run)" } else { "" });

    // ── Taxonomy ─────────────────────────────────────────────────────
    let taxonomy = match (
        std::env::var("TRIAGE_CATEGORIES"),
        std::env::var("TRIAGE_PRIORITIES"),
    ) {
        (Ok(categories), Ok(priorities)) => {
            let default_priority = std::env::var("TRIAGE_DEFAULT_PRIORITY")
                .unwrap_or_else(|_| "Moyenne".to_string());
            Taxonomy::from_lists(&categories, &priorities, &default_priority)
                .context("invalid TRIAGE_CATEGORIES/TRIAGE_PRIORITIES")?
        }
        _ => Taxonomy::default(),
    };
    eprintln!("   Catégories: {}", taxonomy.categories().join(", "));
    eprintln!("   Priorités: {}", taxonomy.priorities().join(", "));

    // ── Analyzer ─────────────────────────────────────────────────────
    let fallback = KeywordClassifier::new(KeywordRules::default_fr(), taxonomy.clone());
    let analyzer: Arc<dyn TicketAnalyzer> = match LlmSettings::from_env() {
        Some(settings) => {
            eprintln!("   Classification: provider ({})", settings.model);
            let provider = create_provider(&settings).context("failed to create LLM provider")?;
            Arc::new(LlmAnalyzer::new(
                provider,
                taxonomy.clone(),
                fallback,
                (&settings).into(),
            ))
        }
        None => {
            eprintln!("   Classification: keyword rules (no provider API key set)");
            Arc::new(fallback)
        }
    };

    // ── Ledger ───────────────────────────────────────────────────────
    let ledger_path = std::env::var("TRIAGE_LEDGER_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/ledger.db"));
    let ledger: Arc<dyn DedupLedger> = Arc::new(
        LibSqlLedger::new_local(&ledger_path)
            .await
            .with_context(|| format!("failed to open ledger at {}", ledger_path.display()))?,
    );
    eprintln!("   Ledger: {}", ledger_path.display());

    // ── Sink ─────────────────────────────────────────────────────────
    let sink: Arc<dyn TicketSink> = match std::env::var("TICKET_WEBHOOK_URL") {
        Ok(url) => {
            eprintln!("   Sink: webhook ({url})");
            Arc::new(WebhookSink::new(url))
        }
        Err(_) if dry_run => {
            eprintln!("   Sink: memory (dry-run)");
            Arc::new(MemorySink::new())
        }
        Err(_) => {
            anyhow::bail!(
                "TICKET_WEBHOOK_URL not set (required outside dry-run mode)\n  export TICKET_WEBHOOK_URL=https://..."
            );
        }
    };

    // ── Notifications ────────────────────────────────────────────────
    let notify_config = NotifyConfig::from_env();
    eprintln!(
        "   Notifications: {}",
        if notify_config.enabled {
            format!("{} webhook(s)", notify_config.webhook_urls.len())
        } else {
            "disabled".to_string()
        }
    );
    let notifier = Arc::new(Notifier::from_config(&notify_config));

    // ── Source ───────────────────────────────────────────────────────
    let spool_dir =
        std::env::var("TRIAGE_SPOOL_DIR").unwrap_or_else(|_| "./spool".to_string());
    let source = Arc::new(
        MaildirSource::new(&spool_dir)
            .with_context(|| format!("failed to open spool at {spool_dir}"))?,
    );
    eprintln!("   Spool: {spool_dir}\n");

    // ── Pipeline ─────────────────────────────────────────────────────
    let pipeline_config = PipelineConfig::from_env();
    let fetch_limit = pipeline_config.max_batch_size;
    let pipeline = Arc::new(IngestionPipeline::new(
        analyzer,
        ledger,
        sink,
        Arc::clone(&notifier),
        taxonomy,
        pipeline_config,
    ));
    let runner = Arc::new(CycleRunner::new(pipeline, source, notifier, fetch_limit));

    let options = RunOptions {
        dry_run,
        ..RunOptions::default()
    };

    match mode.as_str() {
        "daemon" => {
            let interval = Duration::from_secs(
                std::env::var("TRIAGE_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            );
            let stop = Arc::clone(&options.stop);
            let (handle, shutdown) = spawn_cycle_loop(runner, options, interval);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            eprintln!("\nShutting down…");
            shutdown.store(true, Ordering::Relaxed);
            stop.store(true, Ordering::Relaxed);
            handle.await.context("cycle loop panicked")?;
        }
        _ => {
            let report = runner
                .run_once(&options)
                .await
                .context("cycle failed")?;
            eprintln!(
                "Cycle {}: {} créé(s), {} doublon(s), {} échec(s) réessayables, {} échec(s) permanents, {} reporté(s)",
                report.cycle_id,
                report.created() + report.would_create(),
                report.skipped(),
                report.failed_retryable(),
                report.failed_permanent(),
                report.deferred,
            );
        }
    }

    Ok(())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
