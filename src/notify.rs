//! Best-effort notifications — critical tickets and failed cycles.
//!
//! Delivery failures are logged and swallowed: notifications must never
//! fail the pipeline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NotifyConfig;
use crate::pipeline::types::TicketRecord;

/// Events the pipeline reports.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// A ticket with the highest configured priority was created.
    TicketCreatedCritical { ticket: TicketRecord },
    /// A whole run-cycle failed (infrastructure error).
    CycleFailed { cycle_id: Uuid, reason: String },
}

impl NotifyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TicketCreatedCritical { .. } => "ticket_created_critical",
            Self::CycleFailed { .. } => "pipeline_cycle_failed",
        }
    }

    /// One-line human summary (the `text` field of chat webhooks).
    fn text(&self) -> String {
        match self {
            Self::TicketCreatedCritical { ticket } => format!(
                "🚨 Ticket {} ({}) — {} : {}",
                ticket.id, ticket.priority, ticket.sender_email, ticket.subject
            ),
            Self::CycleFailed { cycle_id, reason } => {
                format!("⚠️ Cycle {cycle_id} en échec: {reason}")
            }
        }
    }

    /// Full JSON payload.
    fn payload(&self) -> serde_json::Value {
        match self {
            Self::TicketCreatedCritical { ticket } => json!({
                "event": self.kind(),
                "text": self.text(),
                "ticket": ticket,
            }),
            Self::CycleFailed { cycle_id, reason } => json!({
                "event": self.kind(),
                "text": self.text(),
                "cycle_id": cycle_id,
                "reason": reason,
            }),
        }
    }
}

/// Delivery error for one notification sink.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// One notification destination.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &NotifyEvent) -> Result<(), NotifyError>;
}

// ── Webhook sink ────────────────────────────────────────────────────

/// Posts event payloads to chat-style incoming webhooks (Slack/Teams).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn deliver(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&event.payload())
            .send()
            .await
            .map_err(|e| NotifyError(format!("webhook unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(NotifyError(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ── Memory sink ─────────────────────────────────────────────────────

/// Records events in memory, for tests.
#[derive(Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotifier {
    async fn deliver(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Fans one event out to every configured sink, best-effort.
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    /// No-op notifier.
    pub fn disabled() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Webhook notifier per configured URL; disabled when the config is.
    pub fn from_config(config: &NotifyConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let sinks = config
            .webhook_urls
            .iter()
            .map(|url| Arc::new(WebhookNotifier::new(url.clone())) as Arc<dyn NotificationSink>)
            .collect();
        Self { sinks }
    }

    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sinks: vec![sink] }
    }

    /// Deliver to all sinks. Never fails: per-sink errors are logged.
    pub async fn publish(&self, event: NotifyEvent) {
        if self.sinks.is_empty() {
            debug!(kind = event.kind(), "Notification skipped (no sinks)");
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&event).await {
                warn!(kind = event.kind(), error = %e, "Notification delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::TicketStatus;
    use chrono::Utc;

    fn critical_ticket() -> TicketRecord {
        TicketRecord {
            id: "TKT-20250106-0001".into(),
            message_id: "m1".into(),
            received_at: Utc::now(),
            sender_name: "Alice".into(),
            sender_email: "alice@example.com".into(),
            subject: "Production down".into(),
            category: "Technique".into(),
            priority: "Critique".into(),
            status: TicketStatus::New,
            description: "desc".into(),
            assigned_to: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn memory_notifier_records_events() {
        let memory = Arc::new(MemoryNotifier::new());
        let notifier = Notifier::with_sink(Arc::clone(&memory) as Arc<dyn NotificationSink>);

        notifier
            .publish(NotifyEvent::TicketCreatedCritical {
                ticket: critical_ticket(),
            })
            .await;

        let events = memory.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "ticket_created_critical");
    }

    #[tokio::test]
    async fn disabled_notifier_is_noop() {
        let notifier = Notifier::disabled();
        // Must not panic or block.
        notifier
            .publish(NotifyEvent::CycleFailed {
                cycle_id: Uuid::new_v4(),
                reason: "ledger unreachable".into(),
            })
            .await;
    }

    #[tokio::test]
    async fn failing_sink_does_not_propagate() {
        struct FailingSink;

        #[async_trait]
        impl NotificationSink for FailingSink {
            async fn deliver(&self, _event: &NotifyEvent) -> Result<(), NotifyError> {
                Err(NotifyError("down".into()))
            }
        }

        let notifier = Notifier::with_sink(Arc::new(FailingSink));
        // publish swallows the error.
        notifier
            .publish(NotifyEvent::TicketCreatedCritical {
                ticket: critical_ticket(),
            })
            .await;
    }

    #[test]
    fn payload_shapes() {
        let event = NotifyEvent::TicketCreatedCritical {
            ticket: critical_ticket(),
        };
        let payload = event.payload();
        assert_eq!(payload["event"], "ticket_created_critical");
        assert!(payload["text"].as_str().unwrap().contains("TKT-20250106-0001"));
        assert_eq!(payload["ticket"]["priority"], "Critique");

        let event = NotifyEvent::CycleFailed {
            cycle_id: Uuid::nil(),
            reason: "boom".into(),
        };
        assert_eq!(event.payload()["event"], "pipeline_cycle_failed");
    }

    #[test]
    fn config_disabled_produces_noop() {
        let config = NotifyConfig {
            webhook_urls: vec!["http://example.com/hook".into()],
            enabled: false,
        };
        let notifier = Notifier::from_config(&config);
        assert!(notifier.sinks.is_empty());
    }
}
