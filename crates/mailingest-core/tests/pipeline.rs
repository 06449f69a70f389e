//! End-to-end processing: queue, workers, parser, artifacts and storage.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mailingest_core::config::{ConnectorSettings, StorageSettings};
use mailingest_core::{
    ArtifactStore, Connector, ContentSource, EmailStore, Error, IngestHandler, IngestOutcome,
    IngestRequest, MessageHandler, PipelineStats, QueueItem, Result, SqliteEmailStore, WorkerPool,
    raw_message, work_queue,
};
use mailingest_imap::Uid;
use mailingest_mime::{EmailContent, EmailInfo, ParsedEmail};

const INLINE_IMAGE: &[u8] = b"From: Designer <design@example.com>\r\n\
To: team@target.example\r\n\
Subject: Mockup\r\n\
Date: Mon, 4 Mar 2024 10:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/related; boundary=\"rel\"\r\n\
\r\n\
--rel\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><head><title>Mockup</title></head><body><p>Latest mockup for the landing page, please review before Friday.</p><img src=\"cid:img1\"></body></html>\r\n\
--rel\r\n\
Content-Type: image/png\r\n\
Content-Transfer-Encoding: base64\r\n\
Content-ID: <img1>\r\n\
Content-Disposition: inline\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--rel--\r\n";

fn plain(uid: u32) -> Vec<u8> {
    format!(
        "From: Sender <sender@example.com>\r\n\
         To: team@target.example\r\n\
         Subject: Report {uid}\r\n\
         Date: Mon, 4 Mar 2024 10:00:0{uid} +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Report number {uid}.\r\n"
    )
    .into_bytes()
}

async fn setup(root: &Path) -> (ArtifactStore, Arc<Connector<SqliteEmailStore>>) {
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
    (artifacts, Arc::new(connector))
}

/// Delegates to the real handler but blows up on one UID.
struct FailingOn<S> {
    uid: u32,
    inner: IngestHandler<S>,
}

impl<S: EmailStore> MessageHandler for FailingOn<S> {
    async fn handle(&self, item: QueueItem) -> Result<()> {
        if item.message.uid.get() == self.uid {
            return Err(Error::Storage("parser exploded".to_string()));
        }
        self.inner.handle(item).await
    }
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let (artifacts, connector) = setup(dir.path()).await;
    let stats = PipelineStats::shared();
    let (tx, rx) = work_queue(16, Arc::clone(&stats));
    let handler = Arc::new(FailingOn {
        uid: 3,
        inner: IngestHandler::new(artifacts, Arc::clone(&connector)),
    });
    let pool = WorkerPool::spawn(2, &rx, handler, &stats, Duration::from_millis(20));

    for uid in 1..=5 {
        tx.send(raw_message(Uid::new(uid).unwrap(), plain(uid), Utc::now()))
            .await
            .unwrap();
    }
    drop(tx);
    assert!(pool.drain(Duration::from_secs(10)).await);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.processed, 4);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(connector.store().count_emails().await.unwrap(), 4);
}

#[tokio::test]
async fn test_inline_image_is_embedded_in_stored_html() {
    let dir = tempfile::tempdir().unwrap();
    let (artifacts, connector) = setup(dir.path()).await;
    let handler = IngestHandler::new(artifacts, Arc::clone(&connector));

    let outcome = handler
        .process(&raw_message(Uid::new(1).unwrap(), INLINE_IMAGE.to_vec(), Utc::now()))
        .await
        .unwrap();
    let IngestOutcome::Inserted {
        record_id, source, ..
    } = outcome
    else {
        panic!("expected insert, got {outcome:?}");
    };
    assert_eq!(source, ContentSource::Html);

    let html = connector.store().html_content(record_id).await.unwrap().unwrap();
    assert!(html.contains("data:image/png;base64,"));
    assert!(!html.contains("cid:img1"));
}

#[tokio::test]
async fn test_same_message_under_two_uids_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let (artifacts, connector) = setup(dir.path()).await;
    let handler = IngestHandler::new(artifacts, Arc::clone(&connector));

    let first = handler
        .process(&raw_message(Uid::new(10).unwrap(), plain(1), Utc::now()))
        .await
        .unwrap();
    let second = handler
        .process(&raw_message(Uid::new(11).unwrap(), plain(1), Utc::now()))
        .await
        .unwrap();

    assert!(matches!(first, IngestOutcome::Inserted { .. }));
    assert!(matches!(second, IngestOutcome::Duplicate { .. }));
    assert_eq!(connector.store().count_emails().await.unwrap(), 1);

    // Both raw artifacts are kept; only the record is deduplicated.
    let raws = std::fs::read_dir(dir.path().join("mail"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".eml")
        })
        .count();
    assert_eq!(raws, 2);
}

#[tokio::test]
async fn test_rich_html_wins_over_short_text_and_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (_, connector) = setup(dir.path()).await;

    let parsed = ParsedEmail {
        info: EmailInfo {
            from: "a@example.com".to_string(),
            to: "b@target.example".to_string(),
            subject: "ordering".to_string(),
            ..EmailInfo::default()
        },
        content: EmailContent {
            html: format!("<p>{}</p>", "x".repeat(493)),
            text: "0123456789".to_string(),
            ..EmailContent::default()
        },
    };
    let reconstructed = mailingest_mime::reconstruct(&parsed.content);

    let outcome = connector
        .ingest(IngestRequest {
            parsed: &parsed,
            reconstructed: &reconstructed,
            cached_preview: Some("cache"),
            received_at: Utc::now(),
        })
        .await;

    let IngestOutcome::Inserted {
        record_id, source, ..
    } = outcome
    else {
        panic!("expected insert, got {outcome:?}");
    };
    assert_eq!(source, ContentSource::Html);
    let stored = connector.store().html_content(record_id).await.unwrap().unwrap();
    assert_eq!(stored, reconstructed);
}

#[tokio::test]
async fn test_attachments_are_written_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let (artifacts, connector) = setup(dir.path()).await;
    let handler = IngestHandler::new(artifacts, Arc::clone(&connector));

    let raw = b"From: a@example.com\r\n\
To: b@target.example\r\n\
Subject: Invoice\r\n\
Date: Tue, 5 Mar 2024 09:00:00 +0000\r\n\
Content-Type: multipart/mixed; boundary=\"mix\"\r\n\
\r\n\
--mix\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--mix\r\n\
Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQ=\r\n\
--mix--\r\n";

    let IngestOutcome::Inserted {
        record_id,
        attachments_saved,
        ..
    } = handler
        .process(&raw_message(Uid::new(4).unwrap(), raw.to_vec(), Utc::now()))
        .await
        .unwrap()
    else {
        panic!("expected insert");
    };
    assert_eq!(attachments_saved, 1);

    let rows = connector.store().attachments(record_id).await.unwrap();
    assert_eq!(rows[0].filename, "invoice.pdf");
    assert_eq!(std::fs::read(&rows[0].path).unwrap(), b"%PDF-1.4");
}
