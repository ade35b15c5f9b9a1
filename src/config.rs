//! Configuration types.
//!
//! The library only ever consumes explicit config structs passed into
//! construction — no environment reads, no process-wide mutable state.
//! The `from_env` constructors exist for the binary.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

// ── Taxonomy ────────────────────────────────────────────────────────

/// Closed category and priority sets for classification.
///
/// Both sets are runtime-configurable; every `Classification` the engine
/// emits is guaranteed to draw from them. Alias tables absorb common
/// provider variations ("technical", "billing", "urgent"…) before
/// membership is checked.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    categories: Vec<String>,
    priorities: Vec<String>,
    default_priority: String,
}

impl Taxonomy {
    /// Build a taxonomy from explicit sets.
    ///
    /// The last category is the catch-all used when nothing else fits.
    /// `default_priority` must be a member of `priorities`.
    pub fn new(
        categories: Vec<String>,
        priorities: Vec<String>,
        default_priority: &str,
    ) -> Result<Self, ConfigError> {
        if categories.is_empty() {
            return Err(ConfigError::EmptyTaxonomy("categories".into()));
        }
        if priorities.is_empty() {
            return Err(ConfigError::EmptyTaxonomy("priorities".into()));
        }
        if !priorities.iter().any(|p| p == default_priority) {
            return Err(ConfigError::InvalidValue {
                key: "default_priority".into(),
                message: format!("'{default_priority}' is not in the priority set"),
            });
        }
        Ok(Self {
            categories,
            priorities,
            default_priority: default_priority.to_string(),
        })
    }

    /// Parse comma-separated category/priority lists (the original config
    /// format, e.g. `"Technique,Commercial,Support"`).
    pub fn from_lists(
        categories: &str,
        priorities: &str,
        default_priority: &str,
    ) -> Result<Self, ConfigError> {
        let split = |s: &str| -> Vec<String> {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self::new(split(categories), split(priorities), default_priority)
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn priorities(&self) -> &[String] {
        &self.priorities
    }

    /// The category used when no rule or provider answer fits.
    pub fn catch_all_category(&self) -> &str {
        self.categories.last().map(String::as_str).unwrap_or("")
    }

    pub fn default_priority(&self) -> &str {
        &self.default_priority
    }

    /// Normalize a provider-emitted category into the closed set.
    ///
    /// Resolution order: exact member, alias table, case-insensitive member.
    /// `None` means the value is out of set and the response is unusable.
    pub fn normalize_category(&self, raw: &str) -> Option<String> {
        self.normalize(raw, &self.categories, CATEGORY_ALIASES)
    }

    /// Normalize a provider-emitted priority into the closed set.
    pub fn normalize_priority(&self, raw: &str) -> Option<String> {
        self.normalize(raw, &self.priorities, PRIORITY_ALIASES)
    }

    fn normalize(&self, raw: &str, set: &[String], aliases: &[(&str, &str)]) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(member) = set.iter().find(|m| m.as_str() == trimmed) {
            return Some(member.clone());
        }
        let lower = trimmed.to_lowercase();
        if let Some((_, target)) = aliases.iter().find(|(alias, _)| *alias == lower) {
            if let Some(member) = set.iter().find(|m| m.as_str() == *target) {
                return Some(member.clone());
            }
        }
        set.iter().find(|m| m.to_lowercase() == lower).cloned()
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            categories: ["Technique", "Commercial", "Support", "Facturation", "Autre"]
                .map(String::from)
                .to_vec(),
            priorities: ["Critique", "Haute", "Moyenne", "Basse"]
                .map(String::from)
                .to_vec(),
            default_priority: "Moyenne".to_string(),
        }
    }
}

/// Variations the provider is known to emit for the default category set.
const CATEGORY_ALIASES: &[(&str, &str)] = &[
    ("technical", "Technique"),
    ("tech", "Technique"),
    ("sales", "Commercial"),
    ("billing", "Facturation"),
    ("invoice", "Facturation"),
    ("other", "Autre"),
    ("general", "Autre"),
];

/// Variations the provider is known to emit for the default priority set.
const PRIORITY_ALIASES: &[(&str, &str)] = &[
    ("critical", "Critique"),
    ("urgent", "Critique"),
    ("high", "Haute"),
    ("medium", "Moyenne"),
    ("normale", "Moyenne"),
    ("normal", "Moyenne"),
    ("low", "Basse"),
];

// ── Pipeline ────────────────────────────────────────────────────────

/// Knobs for one ingestion run-cycle.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Messages processed per cycle; the rest stay at the source.
    pub max_batch_size: usize,
    /// Concurrent per-message classification/sink dispatches.
    pub concurrency: usize,
    /// Bound on a single ticket-sink write.
    pub sink_timeout: Duration,
    /// Body excerpt length used in the ticket description.
    pub description_excerpt_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            concurrency: 4,
            sink_timeout: Duration::from_secs(15),
            description_excerpt_chars: 300,
        }
    }
}

impl PipelineConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_batch_size: env_parse("TRIAGE_BATCH_SIZE", defaults.max_batch_size),
            concurrency: env_parse("TRIAGE_CONCURRENCY", defaults.concurrency).max(1),
            sink_timeout: Duration::from_secs(env_parse(
                "TRIAGE_SINK_TIMEOUT_SECS",
                defaults.sink_timeout.as_secs(),
            )),
            description_excerpt_chars: defaults.description_excerpt_chars,
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Groq,
    OpenAi,
}

/// Configuration for the classification provider.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    /// Bound on one provider round-trip.
    pub timeout: Duration,
    /// Strict re-ask attempts after a parse failure.
    pub parse_retries: u32,
    /// Chars of body sent to the provider. Lossy, deliberate: bounds cost
    /// and latency on long messages.
    pub max_body_chars: usize,
}

impl LlmSettings {
    /// Build from environment variables.
    /// Returns `None` if `GROQ_API_KEY`/`OPENAI_API_KEY` are both unset
    /// (the agent then runs on keyword rules alone).
    pub fn from_env() -> Option<Self> {
        let (backend, key, default_model) = if let Ok(key) = std::env::var("GROQ_API_KEY") {
            (LlmBackend::Groq, key, "llama-3.1-70b-versatile")
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            (LlmBackend::OpenAi, key, "gpt-4o-mini")
        } else {
            return None;
        };

        Some(Self {
            backend,
            api_key: SecretString::from(key),
            model: std::env::var("TRIAGE_MODEL").unwrap_or_else(|_| default_model.to_string()),
            timeout: Duration::from_secs(env_parse("TRIAGE_PROVIDER_TIMEOUT_SECS", 30)),
            parse_retries: env_parse("TRIAGE_PARSE_RETRIES", 1),
            max_body_chars: env_parse("TRIAGE_MAX_BODY_CHARS", 1000),
        })
    }
}

// ── Notifications ───────────────────────────────────────────────────

/// Best-effort notification webhooks (Slack/Teams incoming-webhook style).
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub webhook_urls: Vec<String>,
    pub enabled: bool,
}

impl NotifyConfig {
    pub fn from_env() -> Self {
        let mut webhook_urls = Vec::new();
        if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
            webhook_urls.push(url);
        }
        if let Ok(url) = std::env::var("TEAMS_WEBHOOK_URL") {
            webhook_urls.push(url);
        }
        let enabled = std::env::var("NOTIFICATION_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true)
            && !webhook_urls.is_empty();
        Self {
            webhook_urls,
            enabled,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_taxonomy_sets() {
        let tax = Taxonomy::default();
        assert_eq!(tax.categories().len(), 5);
        assert_eq!(tax.catch_all_category(), "Autre");
        assert_eq!(tax.default_priority(), "Moyenne");
    }

    #[test]
    fn normalize_exact_member() {
        let tax = Taxonomy::default();
        assert_eq!(tax.normalize_category("Technique").as_deref(), Some("Technique"));
    }

    #[test]
    fn normalize_via_alias() {
        let tax = Taxonomy::default();
        assert_eq!(tax.normalize_category("billing").as_deref(), Some("Facturation"));
        assert_eq!(tax.normalize_priority("urgent").as_deref(), Some("Critique"));
        assert_eq!(tax.normalize_priority("high").as_deref(), Some("Haute"));
    }

    #[test]
    fn normalize_case_insensitive() {
        let tax = Taxonomy::default();
        assert_eq!(tax.normalize_category("TECHNIQUE").as_deref(), Some("Technique"));
        assert_eq!(tax.normalize_priority("critique").as_deref(), Some("Critique"));
    }

    #[test]
    fn out_of_set_value_is_rejected() {
        let tax = Taxonomy::default();
        assert!(tax.normalize_category("Escalation").is_none());
        assert!(tax.normalize_priority("Apocalyptique").is_none());
        assert!(tax.normalize_category("").is_none());
    }

    #[test]
    fn from_lists_parses_and_trims() {
        let tax = Taxonomy::from_lists("A, B , C", "P1,P2", "P2").unwrap();
        assert_eq!(tax.categories(), &["A", "B", "C"]);
        assert_eq!(tax.catch_all_category(), "C");
        assert_eq!(tax.default_priority(), "P2");
    }

    #[test]
    fn empty_sets_rejected() {
        assert!(Taxonomy::from_lists("", "P1", "P1").is_err());
        assert!(Taxonomy::from_lists("A", "", "X").is_err());
    }

    #[test]
    fn default_priority_must_be_member() {
        let err = Taxonomy::from_lists("A", "P1,P2", "P9");
        assert!(err.is_err());
    }

    #[test]
    fn custom_taxonomy_skips_builtin_aliases_when_absent() {
        // "billing" alias points at "Facturation", which this set lacks.
        let tax = Taxonomy::from_lists("Hardware,Software", "High,Low", "Low").unwrap();
        assert!(tax.normalize_category("billing").is_none());
        assert_eq!(tax.normalize_category("software").as_deref(), Some("Software"));
    }
}
