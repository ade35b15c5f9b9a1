//! Classification engine — category/priority/confidence for each message.
//!
//! The engine is one capability with interchangeable implementations:
//! provider-backed (`LlmAnalyzer`, with deterministic fallback inside) or
//! rule-based (`KeywordClassifier` standalone). A statistical implementation
//! would slot behind the same trait; none is shipped.
//!
//! The central contract is totality: analysis never errors and never stalls
//! past the configured timeout budget. Provider trouble degrades to the
//! keyword fallback, visibly via `ClassificationSource`.

pub mod analyzer;
pub mod keywords;

pub use analyzer::LlmAnalyzer;
pub use keywords::{KeywordClassifier, KeywordRules};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extract::ExtractionDigest;

/// Which path produced a classification. Recorded for observability and
/// asserted on in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Provider,
    Fallback,
}

/// Classification of one message. `category` and `priority` are always
/// members of the configured taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub priority: String,
    /// Clamped to [0, 1]; 0.0 under fallback.
    pub confidence: f32,
    /// Human-readable justification; empty under fallback.
    pub reasoning: String,
    pub source: ClassificationSource,
}

/// Classification plus extraction digest for one message.
///
/// The two are produced together because the preferred provider path is a
/// single combined call.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub classification: Classification,
    pub digest: ExtractionDigest,
}

/// Subject/body/sender triple handed to the engine.
#[derive(Debug, Clone)]
pub struct AnalyzeInput<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    pub sender_email: &'a str,
}

/// A total analysis capability: always returns, never errors.
#[async_trait]
pub trait TicketAnalyzer: Send + Sync {
    async fn analyze(&self, input: AnalyzeInput<'_>) -> Analysis;
}
