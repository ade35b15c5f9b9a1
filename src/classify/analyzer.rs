//! Provider-backed analyzer — one combined completion call yields both the
//! classification and the extraction digest.
//!
//! Failure handling, in order:
//! 1. transient transport trouble → bounded backoff retries on the call
//! 2. unusable response (bad JSON, out-of-set value, bad confidence) →
//!    one stricter re-ask per configured parse retry
//! 3. anything still failing → deterministic keyword fallback
//!
//! The result is total: `analyze` always returns, bounded by
//! timeout × transport attempts × (1 + parse retries).

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::classify::keywords::KeywordClassifier;
use crate::classify::{
    Analysis, AnalyzeInput, Classification, ClassificationSource, TicketAnalyzer,
};
use crate::config::{LlmSettings, Taxonomy};
use crate::error::LlmError;
use crate::extract::ExtractionDigest;
use crate::llm::retry::with_backoff;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Temperature for analysis (low for consistency).
const ANALYZE_TEMPERATURE: f32 = 0.2;

/// Max tokens for the analysis call (runs on every message, kept tight).
const ANALYZE_MAX_TOKENS: u32 = 500;

/// Transport attempts per provider call (1 + one backoff retry).
const TRANSPORT_ATTEMPTS: u32 = 2;

/// Base delay for transport backoff.
const TRANSPORT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Tunables for the provider path.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Bound on one provider round-trip.
    pub timeout: Duration,
    /// Stricter re-asks after an unusable response.
    pub parse_retries: u32,
    /// Chars of body sent to the provider (lossy, bounds cost).
    pub max_body_chars: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            parse_retries: 1,
            max_body_chars: 1000,
        }
    }
}

impl From<&LlmSettings> for AnalyzerOptions {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            timeout: settings.timeout,
            parse_retries: settings.parse_retries,
            max_body_chars: settings.max_body_chars,
        }
    }
}

/// Provider-backed ticket analyzer with deterministic fallback.
pub struct LlmAnalyzer {
    provider: Arc<dyn LlmProvider>,
    taxonomy: Taxonomy,
    fallback: KeywordClassifier,
    options: AnalyzerOptions,
}

impl LlmAnalyzer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        taxonomy: Taxonomy,
        fallback: KeywordClassifier,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            provider,
            taxonomy,
            fallback,
            options,
        }
    }

    /// Classification only. Same call budget as `analyze`.
    pub async fn classify(&self, subject: &str, body: &str, sender_email: &str) -> Classification {
        self.analyze(AnalyzeInput {
            subject,
            body,
            sender_email,
        })
        .await
        .classification
    }

    /// Digest only. Same call budget as `analyze`.
    pub async fn extract(&self, subject: &str, body: &str) -> ExtractionDigest {
        self.analyze(AnalyzeInput {
            subject,
            body,
            sender_email: "",
        })
        .await
        .digest
    }

    async fn call_provider(&self, input: &AnalyzeInput<'_>, strict: bool) -> Result<String, LlmError> {
        let body = truncate_chars(input.body, self.options.max_body_chars);
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(
                input.subject,
                body,
                input.sender_email,
                &self.taxonomy,
                strict,
            )),
        ])
        .with_temperature(ANALYZE_TEMPERATURE)
        .with_max_tokens(ANALYZE_MAX_TOKENS);

        let provider = Arc::clone(&self.provider);
        let timeout = self.options.timeout;
        let response = with_backoff(TRANSPORT_ATTEMPTS, TRANSPORT_BASE_DELAY, || {
            let provider = Arc::clone(&provider);
            let request = request.clone();
            async move {
                tokio::time::timeout(timeout, provider.complete(request))
                    .await
                    .map_err(|_| LlmError::Timeout {
                        provider: "analysis".into(),
                        timeout,
                    })?
            }
        })
        .await?;

        Ok(response.content)
    }

    async fn fallback_analysis(&self, input: AnalyzeInput<'_>) -> Analysis {
        self.fallback.analyze(input).await
    }
}

#[async_trait::async_trait]
impl TicketAnalyzer for LlmAnalyzer {
    async fn analyze(&self, input: AnalyzeInput<'_>) -> Analysis {
        let attempts = 1 + self.options.parse_retries;
        let mut strict = false;

        for attempt in 0..attempts {
            let content = match self.call_provider(&input, strict).await {
                Ok(content) => content,
                Err(err) => {
                    warn!(error = %err, "Provider unavailable, using keyword fallback");
                    return self.fallback_analysis(input).await;
                }
            };

            match parse_analysis(&content, &self.taxonomy) {
                Ok(analysis) => {
                    debug!(
                        category = %analysis.classification.category,
                        priority = %analysis.classification.priority,
                        confidence = analysis.classification.confidence,
                        "Provider classification"
                    );
                    return analysis;
                }
                Err(reason) => {
                    warn!(
                        attempt = attempt + 1,
                        reason = %reason,
                        "Unusable provider response, re-asking"
                    );
                    strict = true;
                }
            }
        }

        warn!("Provider response unusable after re-ask, using keyword fallback");
        self.fallback_analysis(input).await
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "Vous êtes un expert en classification de tickets de support.\n\
     Votre rôle est d'analyser les e-mails entrants et de les classer avec précision \
     selon leur catégorie et leur priorité.\n\n\
     Règles importantes:\n\
     - Analysez le contenu, le sujet et le contexte pour déterminer la catégorie\n\
     - Évaluez l'urgence et l'impact pour déterminer la priorité\n\
     - Utilisez la priorité la plus haute uniquement pour les problèmes bloquants\n\
     - Soyez cohérent et objectif\n\
     - Répondez UNIQUEMENT en JSON valide, sans texte supplémentaire"
        .to_string()
}

fn build_user_prompt(
    subject: &str,
    body: &str,
    sender_email: &str,
    taxonomy: &Taxonomy,
    strict: bool,
) -> String {
    let categories = taxonomy.categories().join(", ");
    let priorities = taxonomy.priorities().join(", ");

    let mut prompt = format!(
        "Analysez cet e-mail de ticket et classez-le:\n\n\
         Sujet: {subject}\n\
         Expéditeur: {sender_email}\n\
         Contenu:\n{body}\n\n\
         Catégories disponibles: {categories}\n\
         Priorités disponibles: {priorities}\n\n\
         Répondez au format JSON avec exactement ces champs:\n\
         - \"category\": une des catégories disponibles\n\
         - \"priority\": une des priorités disponibles\n\
         - \"confidence\": un score entre 0 et 1\n\
         - \"reasoning\": une brève explication (1-2 phrases)\n\
         - \"main_issue\": le problème principal en quelques mots, ou null\n\
         - \"product_or_service\": le produit ou service concerné, ou null\n\
         - \"reference_number\": le numéro de référence mentionné, ou null"
    );

    if strict {
        prompt.push_str(&format!(
            "\n\nRAPPEL STRICT: votre réponse précédente était invalide. \
             Répondez UNIQUEMENT avec un objet JSON, sans aucun texte autour. \
             \"category\" doit être exactement l'une de: {categories}. \
             \"priority\" doit être exactement l'une de: {priorities}. \
             \"confidence\" doit être un nombre entre 0 et 1."
        ));
    }

    prompt
}

/// Truncate on a char boundary.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Raw provider response shape for the combined call.
#[derive(Debug, Deserialize)]
struct ProviderAnalysis {
    #[serde(default)]
    category: String,
    #[serde(default)]
    priority: String,
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    main_issue: Option<String>,
    #[serde(default)]
    product_or_service: Option<String>,
    #[serde(default)]
    reference_number: Option<String>,
}

/// Parse and validate a provider response against the taxonomy.
///
/// Any unusable aspect (bad JSON, out-of-set category/priority after
/// normalization, non-numeric or out-of-range confidence) is a parse
/// failure: the caller re-asks, then falls back.
fn parse_analysis(raw: &str, taxonomy: &Taxonomy) -> Result<Analysis, String> {
    let json_str = extract_json_object(raw);
    let response: ProviderAnalysis =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let category = taxonomy
        .normalize_category(&response.category)
        .ok_or_else(|| format!("category '{}' not in configured set", response.category))?;
    let priority = taxonomy
        .normalize_priority(&response.priority)
        .ok_or_else(|| format!("priority '{}' not in configured set", response.priority))?;

    let confidence = match response.confidence.as_ref().and_then(|v| v.as_f64()) {
        Some(value) if (0.0..=1.0).contains(&value) => value as f32,
        Some(value) => return Err(format!("confidence {value} out of range")),
        None => return Err("confidence missing or not numeric".into()),
    };

    let non_blank = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    Ok(Analysis {
        classification: Classification {
            category,
            priority,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: response.reasoning,
            source: ClassificationSource::Provider,
        },
        digest: ExtractionDigest {
            main_issue: non_blank(response.main_issue),
            product_or_service: non_blank(response.product_or_service),
            reference_number: non_blank(response.reference_number),
        },
    })
}

/// Extract a JSON object from provider output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
