//! The per-message work done by each worker.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use mailingest_imap::Uid;
use tracing::{info, warn};

use crate::artifacts::{ArtifactStore, Summary, SummaryContent};
use crate::connector::{Connector, IngestOutcome, IngestRequest};
use crate::queue::{QueueItem, RawMessage};
use crate::store::EmailStore;
use crate::worker::MessageHandler;
use crate::{Error, Result};

/// Parses, persists and ingests one raw message.
///
/// The raw file and HTML sibling are written before the connector runs, so
/// a storage failure still leaves both on disk for a later `reingest`.
#[derive(Debug)]
pub struct IngestHandler<S> {
    artifacts: ArtifactStore,
    connector: Arc<Connector<S>>,
}

impl<S: EmailStore> IngestHandler<S> {
    /// Creates a handler.
    pub const fn new(artifacts: ArtifactStore, connector: Arc<Connector<S>>) -> Self {
        Self {
            artifacts,
            connector,
        }
    }

    /// Runs the full pipeline for one message.
    ///
    /// # Errors
    ///
    /// Returns an error if an artifact cannot be written or the connector
    /// reports a failure.
    pub async fn process(&self, message: &RawMessage) -> Result<IngestOutcome> {
        let parsed = mailingest_mime::parse(&message.bytes);
        let html = mailingest_mime::reconstruct(&parsed.content);

        let paths = self
            .artifacts
            .write_message(
                message.received_at,
                &parsed.info.subject,
                message.uid,
                &message.bytes,
                &html,
            )
            .await?;

        let summary_content =
            SummaryContent::new(&parsed.content.text, &paths.html_path, &parsed.content.attachments);
        let preview = summary_content.text.clone();
        let summary = Summary {
            id: message.uid.get(),
            timestamp: message.received_at,
            info: &parsed.info,
            content: summary_content,
            processed_time: Utc::now(),
        };
        if let Err(e) = self.artifacts.write_summary(&summary).await {
            warn!(uid = %message.uid, error = %e, "summary not written");
        }

        let outcome = self
            .connector
            .ingest(IngestRequest {
                parsed: &parsed,
                reconstructed: &html,
                cached_preview: Some(&preview),
                received_at: message.received_at,
            })
            .await;

        match &outcome {
            IngestOutcome::Failed { reason } => Err(Error::Storage(reason.clone())),
            IngestOutcome::Inserted { .. } | IngestOutcome::Duplicate { .. } => {
                info!(
                    uid = %message.uid,
                    raw = %paths.raw_path.display(),
                    "message ingested"
                );
                Ok(outcome)
            }
        }
    }

    /// Re-ingests a raw file written by an earlier run.
    ///
    /// Only the connector step runs; the artifacts already exist. The receive
    /// time comes from the `YYYYmmdd_HHMMSS` prefix the artifact store puts on
    /// every raw file, or the file's modification time for files named some
    /// other way. Either way repeated runs over the same file produce the same
    /// natural key when the message has no `Date` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its metadata cannot be read.
    pub async fn reingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        let bytes = tokio::fs::read(path).await?;
        let parsed = mailingest_mime::parse(&bytes);
        let html = mailingest_mime::reconstruct(&parsed.content);
        let received_at = match received_at_from_file_name(path) {
            Some(at) => at,
            None => {
                let modified = tokio::fs::metadata(path).await?.modified()?;
                DateTime::<Utc>::from(modified).trunc_subsecs(0)
            }
        };

        Ok(self
            .connector
            .ingest(IngestRequest {
                parsed: &parsed,
                reconstructed: &html,
                cached_preview: None,
                received_at,
            })
            .await)
    }
}

impl<S: EmailStore> MessageHandler for IngestHandler<S> {
    async fn handle(&self, item: QueueItem) -> Result<()> {
        self.process(&item.message).await.map(|_| ())
    }
}

/// Reads the receive time encoded in an artifact file name.
fn received_at_from_file_name(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let prefix = stem.get(..15)?;
    NaiveDateTime::parse_from_str(prefix, "%Y%m%d_%H%M%S")
        .ok()
        .map(|at| at.and_utc())
}

/// Builds a [`RawMessage`] from fetched bytes.
#[must_use]
pub fn raw_message(uid: Uid, bytes: Vec<u8>, received_at: DateTime<Utc>) -> RawMessage {
    RawMessage {
        uid,
        bytes: Bytes::from(bytes),
        received_at,
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
    use super::*;
    use crate::config::{ConnectorSettings, StorageSettings};
    use crate::store::SqliteEmailStore;

    const RAW: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: team@corp.example\r\n\
Subject: Weekly report\r\n\
Date: Mon, 4 Mar 2024 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Numbers are up this week.\r\n";

    async fn handler(root: &Path) -> IngestHandler<SqliteEmailStore> {
        let settings = StorageSettings {
            save_dir: root.join("mail"),
            attachments_dir: None,
            summary_dir: root.join("queue"),
            database_url: String::new(),
        };
        let artifacts = ArtifactStore::new(&settings);
        artifacts.ensure_dirs().await.unwrap();
        let connector = Connector::new(
            SqliteEmailStore::in_memory().await.unwrap(),
            artifacts.clone(),
            ConnectorSettings::default(),
        );
        IngestHandler::new(artifacts, Arc::new(connector))
    }

    #[tokio::test]
    async fn test_process_writes_artifacts_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;
        let message = raw_message(Uid::new(9).unwrap(), RAW.to_vec(), Utc::now());

        let outcome = handler.process(&message).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Inserted { .. }));

        let files: Vec<String> = std::fs::read_dir(dir.path().join("mail"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(files.iter().any(|f| f.ends_with("_Weekly report_9.eml")));
        assert!(files.iter().any(|f| f.ends_with("_Weekly report_9_display.html")));
        assert!(dir.path().join("queue").join("9.json").exists());
    }

    #[tokio::test]
    async fn test_reingest_file_is_duplicate_after_process() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;
        let message = raw_message(Uid::new(1).unwrap(), RAW.to_vec(), Utc::now());
        let IngestOutcome::Inserted { record_id, .. } = handler.process(&message).await.unwrap()
        else {
            panic!("expected insert");
        };

        let path = dir.path().join("copy.eml");
        std::fs::write(&path, RAW).unwrap();
        assert_eq!(
            handler.reingest_file(&path).await.unwrap(),
            IngestOutcome::Duplicate { record_id }
        );
    }

    const UNDATED: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: team@corp.example\r\n\
Subject: No date here\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Body.\r\n";

    #[tokio::test]
    async fn test_reingest_undated_artifact_matches_original_record() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;
        let received_at = DateTime::parse_from_rfc3339("2024-03-04T10:00:00.750Z")
            .unwrap()
            .with_timezone(&Utc);
        let message = raw_message(Uid::new(4).unwrap(), UNDATED.to_vec(), received_at);
        let IngestOutcome::Inserted { record_id, .. } = handler.process(&message).await.unwrap()
        else {
            panic!("expected insert");
        };

        let raw = std::fs::read_dir(dir.path().join("mail"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|ext| ext == "eml"))
            .unwrap();
        assert!(raw.file_name().unwrap().to_string_lossy().starts_with("20240304_100000_"));
        assert_eq!(
            handler.reingest_file(&raw).await.unwrap(),
            IngestOutcome::Duplicate { record_id }
        );
    }

    #[tokio::test]
    async fn test_reingest_undated_file_twice_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).await;
        let path = dir.path().join("dropped-in.eml");
        std::fs::write(&path, UNDATED).unwrap();

        let IngestOutcome::Inserted { record_id, .. } = handler.reingest_file(&path).await.unwrap()
        else {
            panic!("expected insert");
        };
        assert_eq!(
            handler.reingest_file(&path).await.unwrap(),
            IngestOutcome::Duplicate { record_id }
        );
    }

    #[test]
    fn test_received_at_from_file_name() {
        let at = received_at_from_file_name(Path::new("/mail/20240304_100000_Report_7.eml")).unwrap();
        assert_eq!(at.to_rfc3339(), "2024-03-04T10:00:00+00:00");
        assert!(received_at_from_file_name(Path::new("/mail/copy.eml")).is_none());
        assert!(received_at_from_file_name(Path::new("/mail/2024xx04_100000_a.eml")).is_none());
    }
}
