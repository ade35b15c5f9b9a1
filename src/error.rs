//! Error types for ticket-triage.

use std::time::Duration;

/// Top-level error type for the triage agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Mail source error: {0}")]
    Source(#[from] SourceError),

    #[error("Ticket sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Empty taxonomy: {0}")]
    EmptyTaxonomy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the call is worth retrying at a higher level.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::Timeout { .. })
    }
}

/// Dedup ledger errors. Any of these is fatal for the current cycle —
/// processing without a reachable ledger would break the at-most-once
/// guarantee.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to open ledger store: {0}")]
    Open(String),

    #[error("Ledger query failed: {0}")]
    Query(String),

    #[error("Ledger write failed: {0}")]
    Write(String),
}

/// Mail source errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to fetch messages: {0}")]
    Fetch(String),

    #[error("Failed to mark message {id} processed: {reason}")]
    MarkProcessed { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ticket sink errors, tagged by retry semantics.
///
/// Transient failures leave the ledger untouched so a later cycle retries
/// the message. Permanent failures are also left unrecorded: redelivery is
/// harmless (the ledger is only written on success) and lets an operator
/// fix pick the message up.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Transient sink failure: {0}")]
    Transient(String),

    #[error("Permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Pipeline-level errors. Only infrastructure failures abort a cycle;
/// per-message trouble is captured in the cycle report instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Ledger unreachable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Mail source unreachable: {0}")]
    Source(#[from] SourceError),
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
