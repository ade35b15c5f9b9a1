//! Mail source boundary — where raw messages come from.
//!
//! The pipeline consumes a finite batch per cycle and never marks messages
//! processed itself; the cycle scheduler does that, and only for outcomes
//! that were durably handled (created or duplicate).

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::SourceError;

/// A raw transport message, untouched bytes plus transport bookkeeping.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Transport-level handle (spool filename, IMAP uid). Distinct from the
    /// RFC 822 Message-ID the normalizer extracts.
    pub id: String,
    pub bytes: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// Source of raw messages for a cycle.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch up to `max` unprocessed messages.
    async fn fetch(&self, max: usize) -> Result<Vec<RawMessage>, SourceError>;

    /// Mark a message processed so later cycles no longer see it.
    async fn mark_processed(&self, id: &str) -> Result<(), SourceError>;
}

// ── Maildir-style spool ─────────────────────────────────────────────

/// Local spool directory of raw RFC 822 files.
///
/// Unprocessed messages live in `<root>/new/`; `mark_processed` moves a
/// file to `<root>/cur/`. The move is atomic on one filesystem, so a crash
/// mid-cycle leaves the message visible for the next cycle (redelivery is
/// safe — dedup is the ledger's job, not the spool's).
pub struct MaildirSource {
    new_dir: PathBuf,
    cur_dir: PathBuf,
}

impl MaildirSource {
    /// Open (or create) a spool rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let root = root.into();
        let new_dir = root.join("new");
        let cur_dir = root.join("cur");
        std::fs::create_dir_all(&new_dir)?;
        std::fs::create_dir_all(&cur_dir)?;
        Ok(Self { new_dir, cur_dir })
    }
}

#[async_trait]
impl MailSource for MaildirSource {
    async fn fetch(&self, max: usize) -> Result<Vec<RawMessage>, SourceError> {
        let mut names: Vec<String> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.new_dir)
            .await
            .map_err(|e| SourceError::Fetch(format!("read spool dir: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::Fetch(format!("read spool entry: {e}")))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SourceError::Fetch(format!("stat spool entry: {e}")))?;
            if file_type.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        // Filename order keeps cycles reproducible.
        names.sort();
        names.truncate(max);

        let mut messages = Vec::with_capacity(names.len());
        for name in names {
            let path = self.new_dir.join(&name);
            match tokio::fs::read(&path).await {
                Ok(bytes) => messages.push(RawMessage {
                    id: name,
                    bytes,
                    fetched_at: Utc::now(),
                }),
                // Raced with an external consumer; skip rather than fail the cycle.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(file = %name, "Spool file vanished before read");
                }
                Err(e) => {
                    return Err(SourceError::Fetch(format!("read {name}: {e}")));
                }
            }
        }

        debug!(count = messages.len(), "Fetched spool messages");
        Ok(messages)
    }

    async fn mark_processed(&self, id: &str) -> Result<(), SourceError> {
        let from = self.new_dir.join(id);
        let to = self.cur_dir.join(id);
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| SourceError::MarkProcessed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spool_with(files: &[(&str, &str)]) -> (tempfile::TempDir, MaildirSource) {
        let dir = tempfile::tempdir().unwrap();
        let source = MaildirSource::new(dir.path()).unwrap();
        for (name, content) in files {
            tokio::fs::write(dir.path().join("new").join(name), content)
                .await
                .unwrap();
        }
        (dir, source)
    }

    #[tokio::test]
    async fn fetch_returns_files_in_name_order() {
        let (_dir, source) = spool_with(&[("b.eml", "B"), ("a.eml", "A"), ("c.eml", "C")]).await;
        let messages = source.fetch(10).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a.eml", "b.eml", "c.eml"]);
        assert_eq!(messages[0].bytes, b"A");
    }

    #[tokio::test]
    async fn fetch_respects_max() {
        let (_dir, source) = spool_with(&[("a.eml", "A"), ("b.eml", "B"), ("c.eml", "C")]).await;
        let messages = source.fetch(2).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn mark_processed_moves_out_of_new() {
        let (dir, source) = spool_with(&[("a.eml", "A")]).await;
        source.mark_processed("a.eml").await.unwrap();

        assert!(source.fetch(10).await.unwrap().is_empty());
        assert!(dir.path().join("cur/a.eml").exists());
    }

    #[tokio::test]
    async fn mark_processed_missing_file_errors() {
        let (_dir, source) = spool_with(&[]).await;
        let result = source.mark_processed("ghost.eml").await;
        assert!(matches!(result, Err(SourceError::MarkProcessed { .. })));
    }

    #[tokio::test]
    async fn empty_spool_yields_empty_batch() {
        let (_dir, source) = spool_with(&[]).await;
        assert!(source.fetch(10).await.unwrap().is_empty());
    }
}
