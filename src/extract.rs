//! Extraction engine — short structured digest for the ticket description.
//!
//! The provider path shares the classification call (one combined request);
//! this module holds the digest type and the deterministic path used when
//! the provider is unavailable. Extraction never fails the pipeline: the
//! worst case is a digest with every field absent.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured digest of one message. All fields optional; absent fields are
/// simply omitted from the ticket description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionDigest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_or_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
}

impl ExtractionDigest {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.main_issue.is_none()
            && self.product_or_service.is_none()
            && self.reference_number.is_none()
    }

    /// Human-readable lines appended to the ticket description.
    pub fn description_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(issue) = &self.main_issue {
            lines.push(format!("Problème: {issue}"));
        }
        if let Some(product) = &self.product_or_service {
            lines.push(format!("Produit/Service: {product}"));
        }
        if let Some(reference) = &self.reference_number {
            lines.push(format!("Référence: {reference}"));
        }
        lines
    }
}

// ── Deterministic path ──────────────────────────────────────────────

/// Scans text for reference identifiers (ticket/order/invoice numbers).
pub struct ReferenceScanner {
    tagged: Regex,
    keyword: Regex,
}

impl ReferenceScanner {
    /// Build a scanner with a custom tagged-identifier pattern.
    pub fn new(tagged_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            tagged: Regex::new(tagged_pattern)?,
            keyword: Self::keyword_regex(),
        })
    }

    fn keyword_regex() -> Regex {
        // "référence", "commande", "facture", "ticket", "dossier" followed by
        // a separator and an identifier.
        Regex::new(
            r"(?i)\b(?:r[ée]f[ée]rence|r[ée]f|ticket|commande|facture|invoice|order|dossier)\s*(?:n[°o]\.?|num[ée]ro|#|:)?\s*([A-Za-z]*\d[A-Za-z0-9-]{2,})",
        )
        .unwrap()
    }

    /// First reference found in subject+body, tagged identifiers winning
    /// over keyword-introduced ones.
    pub fn scan(&self, subject: &str, body: &str) -> Option<String> {
        let text = format!("{subject}\n{body}");
        if let Some(m) = self.tagged.find(&text) {
            return Some(m.as_str().to_string());
        }
        self.keyword
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl Default for ReferenceScanner {
    fn default() -> Self {
        // `REF-1234`, `TKT-20250101-0007`, `CMD-889`…
        Self {
            tagged: Regex::new(r"\b[A-Z]{2,6}-[0-9][0-9A-Z-]{2,}\b").unwrap(),
            keyword: Self::keyword_regex(),
        }
    }
}

/// Digest produced without the provider: cleaned subject as the main issue,
/// scanned reference number, no product guess.
pub fn fallback_digest(subject: &str, body: &str, scanner: &ReferenceScanner) -> ExtractionDigest {
    ExtractionDigest {
        main_issue: clean_subject(subject),
        product_or_service: None,
        reference_number: scanner.scan(subject, body),
    }
}

/// Strip reply/forward prefixes; `None` when nothing remains.
fn clean_subject(subject: &str) -> Option<String> {
    let mut s = subject.trim();
    loop {
        let lower = s.to_lowercase();
        let stripped = ["re:", "fwd:", "fw:", "tr:"]
            .iter()
            .find(|p| lower.starts_with(*p))
            .map(|p| s[p.len()..].trim_start());
        match stripped {
            Some(rest) => s = rest,
            None => break,
        }
    }
    if s.is_empty() { None } else { Some(s.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest_has_no_lines() {
        let digest = ExtractionDigest::empty();
        assert!(digest.is_empty());
        assert!(digest.description_lines().is_empty());
    }

    #[test]
    fn description_lines_include_present_fields_only() {
        let digest = ExtractionDigest {
            main_issue: Some("Connexion impossible".into()),
            product_or_service: None,
            reference_number: Some("REF-4521".into()),
        };
        let lines = digest.description_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Connexion impossible"));
        assert!(lines[1].contains("REF-4521"));
    }

    #[test]
    fn scanner_finds_tagged_reference() {
        let scanner = ReferenceScanner::default();
        assert_eq!(
            scanner.scan("Probleme commande", "Ma commande REF-88231 n'est pas arrivee"),
            Some("REF-88231".into())
        );
    }

    #[test]
    fn scanner_finds_keyword_reference() {
        let scanner = ReferenceScanner::default();
        assert_eq!(
            scanner.scan("Facture", "Concernant la facture n° 20250114 merci de verifier"),
            Some("20250114".into())
        );
    }

    #[test]
    fn scanner_prefers_tagged_over_keyword() {
        let scanner = ReferenceScanner::default();
        assert_eq!(
            scanner.scan("dossier 999", "voir TKT-123456"),
            Some("TKT-123456".into())
        );
    }

    #[test]
    fn scanner_none_when_no_reference() {
        let scanner = ReferenceScanner::default();
        assert_eq!(scanner.scan("Bonjour", "Simple question sans numero"), None);
    }

    #[test]
    fn fallback_digest_uses_cleaned_subject() {
        let scanner = ReferenceScanner::default();
        let digest = fallback_digest("Re: Fwd: Panne serveur", "tout est bloque", &scanner);
        assert_eq!(digest.main_issue.as_deref(), Some("Panne serveur"));
        assert!(digest.product_or_service.is_none());
    }

    #[test]
    fn fallback_digest_blank_subject_absent() {
        let scanner = ReferenceScanner::default();
        let digest = fallback_digest("  ", "corps", &scanner);
        assert!(digest.main_issue.is_none());
    }

    #[test]
    fn digest_serde_omits_absent_fields() {
        let digest = ExtractionDigest {
            main_issue: Some("x".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&digest).unwrap();
        assert!(json.get("product_or_service").is_none());
        assert!(json.get("reference_number").is_none());
    }
}
