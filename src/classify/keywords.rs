//! Deterministic keyword classifier — the offline fallback path, also
//! usable as the sole backend when no provider is configured.

use async_trait::async_trait;
use tracing::debug;

use crate::classify::{
    Analysis, AnalyzeInput, Classification, ClassificationSource, TicketAnalyzer,
};
use crate::config::Taxonomy;
use crate::extract::{ReferenceScanner, fallback_digest};

/// Keyword lists per category and per priority.
///
/// List order is the tie-break order: on equal hit counts the earlier entry
/// wins. Category entries must name members of the taxonomy.
#[derive(Debug, Clone)]
pub struct KeywordRules {
    pub categories: Vec<(String, Vec<String>)>,
    pub priorities: Vec<(String, Vec<String>)>,
}

impl KeywordRules {
    /// Default French rules matching the default taxonomy.
    pub fn default_fr() -> Self {
        let list = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        Self {
            categories: vec![
                (
                    "Technique".into(),
                    list(&[
                        "bug",
                        "erreur",
                        "problème",
                        "probleme",
                        "ne fonctionne pas",
                        "crash",
                        "panne",
                        "serveur",
                        "server",
                        "down",
                        "api",
                        "technique",
                    ]),
                ),
                (
                    "Commercial".into(),
                    list(&["achat", "vente", "devis", "prix", "commande", "tarif", "offre"]),
                ),
                (
                    "Support".into(),
                    list(&["aide", "question", "comment", "assistance", "utiliser"]),
                ),
                (
                    "Facturation".into(),
                    list(&[
                        "facture",
                        "paiement",
                        "facturation",
                        "invoice",
                        "prélèvement",
                        "remboursement",
                    ]),
                ),
            ],
            priorities: vec![
                (
                    "Critique".into(),
                    list(&["urgent", "critique", "bloquant", "immédiat", "immediat", "production"]),
                ),
                (
                    "Haute".into(),
                    list(&["important", "priorité", "priorite", "rapide", "dès que possible"]),
                ),
                (
                    "Basse".into(),
                    list(&["pas urgent", "quand possible", "anodin", "mineur"]),
                ),
            ],
        }
    }
}

/// Rule-based classifier. Pure: same input, same output, no I/O.
pub struct KeywordClassifier {
    rules: KeywordRules,
    taxonomy: Taxonomy,
    scanner: ReferenceScanner,
}

impl KeywordClassifier {
    pub fn new(rules: KeywordRules, taxonomy: Taxonomy) -> Self {
        Self {
            rules,
            taxonomy,
            scanner: ReferenceScanner::default(),
        }
    }

    /// Classify by keyword hits over subject+body, case-insensitive.
    ///
    /// Most hits wins; ties break by rule order. Zero hits everywhere falls
    /// to the taxonomy catch-all / default priority. Always `confidence
    /// 0.0`, `source Fallback`, empty reasoning.
    pub fn classify(&self, subject: &str, body: &str) -> Classification {
        let haystack = format!("{subject} {body}").to_lowercase();

        let category = pick(&self.rules.categories, &haystack)
            .unwrap_or_else(|| self.taxonomy.catch_all_category().to_string());
        let priority = pick(&self.rules.priorities, &haystack)
            .unwrap_or_else(|| self.taxonomy.default_priority().to_string());

        debug!(category = %category, priority = %priority, "Keyword classification");

        Classification {
            category,
            priority,
            confidence: 0.0,
            reasoning: String::new(),
            source: ClassificationSource::Fallback,
        }
    }
}

/// Highest-scoring entry, ties broken by list order; `None` on zero hits.
fn pick(entries: &[(String, Vec<String>)], haystack: &str) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for (name, keywords) in entries {
        let hits = keywords
            .iter()
            .filter(|kw| haystack.contains(kw.as_str()))
            .count();
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((name, hits));
        }
    }
    best.map(|(name, _)| name.to_string())
}

#[async_trait]
impl TicketAnalyzer for KeywordClassifier {
    async fn analyze(&self, input: AnalyzeInput<'_>) -> Analysis {
        Analysis {
            classification: self.classify(input.subject, input.body),
            digest: fallback_digest(input.subject, input.body, &self.scanner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::new(KeywordRules::default_fr(), Taxonomy::default())
    }

    #[test]
    fn technical_keywords_win() {
        let c = classifier().classify("Erreur serveur", "Le serveur est en panne depuis ce matin");
        assert_eq!(c.category, "Technique");
        assert_eq!(c.source, ClassificationSource::Fallback);
        assert_eq!(c.confidence, 0.0);
        assert!(c.reasoning.is_empty());
    }

    #[test]
    fn billing_keywords_win() {
        let c = classifier().classify("Facture", "Probleme de paiement sur ma facture de janvier");
        assert_eq!(c.category, "Facturation");
    }

    #[test]
    fn urgent_keywords_set_critical_priority() {
        let c = classifier().classify(
            "Urgent: serveur down",
            "C'est bloquant pour toute la production",
        );
        assert_eq!(c.category, "Technique");
        assert_eq!(c.priority, "Critique");
    }

    #[test]
    fn low_priority_phrases() {
        let c = classifier().classify("Question", "Pas urgent, quand possible merci");
        assert_eq!(c.priority, "Basse");
    }

    #[test]
    fn no_hits_fall_to_catch_all_and_default() {
        let c = classifier().classify("Bonjour", "Je vous écris au sujet de rien de spécial");
        assert_eq!(c.category, "Autre");
        assert_eq!(c.priority, "Moyenne");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let c = classifier().classify("PANNE SERVEUR", "URGENT");
        assert_eq!(c.category, "Technique");
        assert_eq!(c.priority, "Critique");
    }

    #[test]
    fn tie_breaks_by_rule_order() {
        // One hit each for Technique ("bug") and Commercial ("devis");
        // Technique is listed first.
        let c = classifier().classify("bug devis", "");
        assert_eq!(c.category, "Technique");
    }

    #[test]
    fn empty_input_still_classifies() {
        let c = classifier().classify("", "");
        assert_eq!(c.category, "Autre");
        assert_eq!(c.priority, "Moyenne");
    }

    #[test]
    fn non_ascii_input_handled() {
        let c = classifier().classify("Problème d'accès", "Immédiat : rien ne fonctionne 🙁");
        assert_eq!(c.priority, "Critique");
    }

    #[tokio::test]
    async fn analyze_includes_fallback_digest() {
        let analyzer = classifier();
        let analysis = analyzer
            .analyze(AnalyzeInput {
                subject: "Re: Panne serveur",
                body: "Voir dossier REF-9921",
                sender_email: "a@b.c",
            })
            .await;
        assert_eq!(analysis.classification.category, "Technique");
        assert_eq!(analysis.digest.main_issue.as_deref(), Some("Panne serveur"));
        assert_eq!(analysis.digest.reference_number.as_deref(), Some("REF-9921"));
    }
}
