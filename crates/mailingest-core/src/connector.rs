//! Ingestion connector: duplicate detection, content selection and
//! persistence through an [`EmailStore`].
//!
//! [`Connector::ingest`] never returns an error. Every outcome, including
//! storage failures, is an [`IngestOutcome`] value.

use chrono::{DateTime, Utc};
use mailingest_mime::{Attachment, EmailContent, ParsedEmail, add_display_styles, wrap_text};
use tracing::{debug, info, warn};

use crate::Result;
use crate::artifacts::ArtifactStore;
use crate::config::ConnectorSettings;
use crate::store::{EmailStore, NaturalKey};

/// Which representation was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    /// The HTML body, with inline images resolved.
    Html,
    /// The plain-text body in a display shell.
    WrappedText,
    /// The cached summary preview in a display shell.
    Cached,
    /// The reconstructed document, used when nothing else qualified.
    Reconstructed,
}

/// Input to [`Connector::ingest`].
#[derive(Debug, Clone, Copy)]
pub struct IngestRequest<'a> {
    /// Parsed message.
    pub parsed: &'a ParsedEmail,
    /// Output of `reconstruct` for the message.
    pub reconstructed: &'a str,
    /// Previously serialized preview, if one exists.
    pub cached_preview: Option<&'a str>,
    /// When the message was received. Stands in for an unreadable `Date`.
    pub received_at: DateTime<Utc>,
}

/// Result of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new record was written.
    Inserted {
        /// Id of the new record.
        record_id: i64,
        /// Representation that was stored.
        source: ContentSource,
        /// Attachments persisted.
        attachments_saved: usize,
        /// Attachments that failed and were skipped.
        attachments_failed: usize,
    },
    /// A record with the same natural key already existed.
    Duplicate {
        /// Id of the existing record.
        record_id: i64,
    },
    /// Nothing was written.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl IngestOutcome {
    /// Returns true for [`IngestOutcome::Inserted`] and
    /// [`IngestOutcome::Duplicate`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Picks the richest non-trivial representation of a message.
///
/// Lengths are measured in characters of trimmed content, and each
/// threshold must be exceeded.
#[must_use]
pub fn select_content(
    settings: &ConnectorSettings,
    content: &EmailContent,
    reconstructed: &str,
    cached_preview: Option<&str>,
) -> (ContentSource, String) {
    let len = |s: &str| s.trim().chars().count();

    if len(&content.html) > settings.min_html_len {
        return (ContentSource::Html, reconstructed.to_string());
    }
    if len(&content.text) > settings.min_text_len {
        return (ContentSource::WrappedText, shell(&content.text));
    }
    if let Some(cached) = cached_preview
        && len(cached) > settings.min_cached_len
    {
        return (ContentSource::Cached, shell(cached));
    }
    (ContentSource::Reconstructed, reconstructed.to_string())
}

fn shell(text: &str) -> String {
    add_display_styles(&wrap_text(text))
}

/// Writes parsed messages to the storage collaborator.
#[derive(Debug)]
pub struct Connector<S> {
    store: S,
    artifacts: ArtifactStore,
    settings: ConnectorSettings,
}

impl<S: EmailStore> Connector<S> {
    /// Creates a connector.
    pub const fn new(store: S, artifacts: ArtifactStore, settings: ConnectorSettings) -> Self {
        Self {
            store,
            artifacts,
            settings,
        }
    }

    /// Returns the underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Ingests one message.
    pub async fn ingest(&self, request: IngestRequest<'_>) -> IngestOutcome {
        let parsed = request.parsed;
        let key = NaturalKey::from_info(&parsed.info, request.received_at);

        match self.store.find_by_natural_key(&key).await {
            Ok(Some(record_id)) => {
                debug!(record_id, subject = %key.subject, "natural key already stored");
                return IngestOutcome::Duplicate { record_id };
            }
            Ok(None) => {}
            Err(e) => {
                return IngestOutcome::Failed {
                    reason: format!("duplicate lookup failed: {e}"),
                };
            }
        }

        let (source, html) = select_content(
            &self.settings,
            &parsed.content,
            request.reconstructed,
            request.cached_preview,
        );

        let record_id = match self.store.save_email(&key, &html).await {
            Ok(id) => id,
            Err(e) => {
                // Another worker may have inserted the same key in between.
                if let Ok(Some(record_id)) = self.store.find_by_natural_key(&key).await {
                    return IngestOutcome::Duplicate { record_id };
                }
                return IngestOutcome::Failed {
                    reason: format!("saving email failed: {e}"),
                };
            }
        };

        let mut saved = 0;
        let mut failed = 0;
        for attachment in &parsed.content.attachments {
            match self.save_attachment(record_id, attachment).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!(record_id, filename = %attachment.filename, error = %e, "attachment skipped");
                    failed += 1;
                }
            }
        }

        info!(
            record_id,
            ?source,
            sender = %key.sender,
            subject = %key.subject,
            attachments = saved,
            "email stored"
        );

        IngestOutcome::Inserted {
            record_id,
            source,
            attachments_saved: saved,
            attachments_failed: failed,
        }
    }

    async fn save_attachment(&self, record_id: i64, attachment: &Attachment) -> Result<()> {
        let path = self.artifacts.write_attachment(record_id, attachment).await?;
        let size = u64::try_from(attachment.payload.len()).unwrap_or(u64::MAX);
        self.store
            .save_attachment(
                record_id,
                &attachment.filename,
                &path.to_string_lossy(),
                size,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::path::Path;

    use mailingest_mime::EmailInfo;

    use super::*;
    use crate::config::StorageSettings;
    use crate::store::SqliteEmailStore;

    fn content(html_len: usize, text_len: usize) -> EmailContent {
        EmailContent {
            html: "h".repeat(html_len),
            text: "t".repeat(text_len),
            ..EmailContent::default()
        }
    }

    fn parsed(subject: &str) -> ParsedEmail {
        ParsedEmail {
            info: EmailInfo {
                from: "alice@example.com".to_string(),
                to: "team@corp.example".to_string(),
                subject: subject.to_string(),
                date: "Mon, 4 Mar 2024 10:00:00 +0000".to_string(),
                ..EmailInfo::default()
            },
            content: EmailContent {
                text: "short".to_string(),
                attachments: vec![Attachment {
                    filename: "r.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    size_bytes: 3,
                    payload: b"%PD".to_vec(),
                }],
                ..EmailContent::default()
            },
        }
    }

    async fn connector(root: &Path) -> Connector<SqliteEmailStore> {
        let artifacts = ArtifactStore::new(&StorageSettings {
            save_dir: root.to_path_buf(),
            ..StorageSettings::default()
        });
        Connector::new(
            SqliteEmailStore::in_memory().await.unwrap(),
            artifacts,
            ConnectorSettings::default(),
        )
    }

    #[test]
    fn test_select_prefers_long_html() {
        let (source, html) =
            select_content(&ConnectorSettings::default(), &content(500, 10), "RECON", Some("12345"));
        assert_eq!(source, ContentSource::Html);
        assert_eq!(html, "RECON");
    }

    #[test]
    fn test_select_falls_through_in_order() {
        let settings = ConnectorSettings::default();

        let (source, _) = select_content(&settings, &content(20, 80), "R", None);
        assert_eq!(source, ContentSource::WrappedText);

        let cached = "c".repeat(60);
        let (source, html) = select_content(&settings, &content(20, 10), "R", Some(&cached));
        assert_eq!(source, ContentSource::Cached);
        assert!(html.contains(&cached));

        let (source, html) = select_content(&settings, &content(20, 10), "R", Some("tiny"));
        assert_eq!(source, ContentSource::Reconstructed);
        assert_eq!(html, "R");
    }

    #[test]
    fn test_select_threshold_is_exclusive() {
        let settings = ConnectorSettings::default();
        let (source, _) = select_content(&settings, &content(settings.min_html_len, 0), "R", None);
        assert_eq!(source, ContentSource::Reconstructed);
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let connector = connector(dir.path()).await;
        let email = parsed("Q3");
        let request = IngestRequest {
            parsed: &email,
            reconstructed: "<html></html>",
            cached_preview: None,
            received_at: Utc::now(),
        };

        let first = connector.ingest(request).await;
        let IngestOutcome::Inserted {
            record_id,
            attachments_saved,
            ..
        } = first
        else {
            panic!("expected insert, got {first:?}");
        };
        assert_eq!(attachments_saved, 1);

        assert_eq!(
            connector.ingest(request).await,
            IngestOutcome::Duplicate { record_id }
        );
        assert_eq!(connector.store().count_emails().await.unwrap(), 1);
        assert_eq!(connector.store().attachments(record_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attachment_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the attachments directory should be.
        std::fs::write(dir.path().join("attachments"), b"").unwrap();
        let connector = connector(dir.path()).await;
        let email = parsed("blocked");

        let outcome = connector
            .ingest(IngestRequest {
                parsed: &email,
                reconstructed: "<html></html>",
                cached_preview: None,
                received_at: Utc::now(),
            })
            .await;

        assert!(matches!(
            outcome,
            IngestOutcome::Inserted {
                attachments_saved: 0,
                attachments_failed: 1,
                ..
            }
        ));
        assert!(outcome.is_success());
    }
}
