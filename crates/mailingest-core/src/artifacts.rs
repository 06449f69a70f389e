//! File-backed artifacts: raw `.eml`, reconstructed HTML, attachments and
//! summary records.
//!
//! Raw and HTML files are named `<YYYYmmdd_HHMMSS>_<subject>_<uid>`, so two
//! workers never write the same path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mailingest_imap::Uid;
use mailingest_mime::{Attachment, EmailInfo};
use serde::Serialize;
use tokio::fs;

use crate::Result;
use crate::config::StorageSettings;

const SUBJECT_MAX_CHARS: usize = 30;
const PREVIEW_MAX_CHARS: usize = 1000;

/// Where artifacts are written.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    save_dir: PathBuf,
    attachments_dir: PathBuf,
    summary_dir: Option<PathBuf>,
}

/// Paths of the raw and HTML files for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageArtifacts {
    /// The original bytes.
    pub raw_path: PathBuf,
    /// The reconstructed display document.
    pub html_path: PathBuf,
}

/// Summary record for consumers that poll the filesystem.
#[derive(Debug, Clone, Serialize)]
pub struct Summary<'a> {
    /// UID of the message.
    pub id: u32,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Header fields.
    pub info: &'a EmailInfo,
    /// Body preview and artifact references.
    pub content: SummaryContent,
    /// When processing finished.
    pub processed_time: DateTime<Utc>,
}

/// The `content` member of a [`Summary`].
#[derive(Debug, Clone, Serialize)]
pub struct SummaryContent {
    /// Leading text of the plain body.
    pub text: String,
    /// Path of the reconstructed HTML.
    pub html_path: PathBuf,
    /// Attachment metadata.
    pub attachments: Vec<AttachmentMeta>,
}

/// Attachment metadata in a [`Summary`].
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentMeta {
    /// File name.
    pub filename: String,
    /// Decoded size in bytes.
    pub size: usize,
    /// MIME type.
    pub content_type: String,
}

impl SummaryContent {
    /// Builds the summary content for a parsed message.
    #[must_use]
    pub fn new(text: &str, html_path: &Path, attachments: &[Attachment]) -> Self {
        Self {
            text: text.chars().take(PREVIEW_MAX_CHARS).collect(),
            html_path: html_path.to_path_buf(),
            attachments: attachments
                .iter()
                .map(|a| AttachmentMeta {
                    filename: a.filename.clone(),
                    size: a.size_bytes,
                    content_type: a.content_type.clone(),
                })
                .collect(),
        }
    }
}

impl ArtifactStore {
    /// Creates a store for the configured directories.
    #[must_use]
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            save_dir: settings.save_dir.clone(),
            attachments_dir: settings.attachments_dir(),
            summary_dir: settings.summary_dir().map(Path::to_path_buf),
        }
    }

    /// Creates every configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.save_dir).await?;
        fs::create_dir_all(&self.attachments_dir).await?;
        if let Some(dir) = &self.summary_dir {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Returns the raw and HTML paths for a message.
    #[must_use]
    pub fn paths_for(&self, received_at: DateTime<Utc>, subject: &str, uid: Uid) -> MessageArtifacts {
        let stem = format!(
            "{}_{}_{uid}",
            received_at.format("%Y%m%d_%H%M%S"),
            safe_subject(subject)
        );
        MessageArtifacts {
            raw_path: self.save_dir.join(format!("{stem}.eml")),
            html_path: self.save_dir.join(format!("{stem}_display.html")),
        }
    }

    /// Writes the raw bytes and reconstructed HTML for a message.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be written.
    pub async fn write_message(
        &self,
        received_at: DateTime<Utc>,
        subject: &str,
        uid: Uid,
        raw: &[u8],
        html: &str,
    ) -> Result<MessageArtifacts> {
        let paths = self.paths_for(received_at, subject, uid);
        fs::write(&paths.raw_path, raw).await?;
        fs::write(&paths.html_path, html).await?;
        Ok(paths)
    }

    /// Writes an attachment under `<attachments dir>/<record id>/`.
    ///
    /// A name already taken in that directory gets a numeric suffix.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn write_attachment(&self, record_id: i64, attachment: &Attachment) -> Result<PathBuf> {
        let dir = self.attachments_dir.join(record_id.to_string());
        fs::create_dir_all(&dir).await?;

        let name = safe_filename(&attachment.filename);
        let mut path = dir.join(&name);
        let mut n = 1;
        while fs::try_exists(&path).await? {
            path = dir.join(numbered(&name, n));
            n += 1;
        }

        fs::write(&path, &attachment.payload).await?;
        Ok(path)
    }

    /// Writes `<summary dir>/<uid>.json`. Returns `None` when summaries are
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn write_summary(&self, summary: &Summary<'_>) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.summary_dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.json", summary.id));
        let json = serde_json::to_vec_pretty(summary)?;
        fs::write(&path, json).await?;
        Ok(Some(path))
    }
}

/// Keeps alphanumerics, space, `-` and `_`, right-trims and truncates.
#[must_use]
pub fn safe_subject(subject: &str) -> String {
    let kept: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let truncated: String = kept.trim_end().chars().take(SUBJECT_MAX_CHARS).collect();
    if truncated.trim().is_empty() {
        "NoSubject".to_string()
    } else {
        truncated
    }
}

/// Strips path components and characters unsafe in file names.
#[must_use]
pub fn safe_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `report.pdf` becomes `report_1.pdf`.
fn numbered(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
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
    use chrono::TimeZone;

    use super::*;

    fn store(root: &Path) -> ArtifactStore {
        ArtifactStore::new(&StorageSettings {
            save_dir: root.join("mail"),
            attachments_dir: None,
            summary_dir: root.join("queue"),
            database_url: String::new(),
        })
    }

    fn attachment(name: &str) -> Attachment {
        Attachment {
            filename: name.to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 3,
            payload: b"%PD".to_vec(),
        }
    }

    #[test]
    fn test_safe_subject() {
        assert_eq!(safe_subject("Re: Q3 report / final!"), "Re Q3 report  final");
        assert_eq!(safe_subject("季度报告"), "季度报告");
        assert_eq!(safe_subject("???"), "NoSubject");
        assert_eq!(safe_subject(&"a".repeat(80)).len(), 30);
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("../../etc/passwd"), "passwd");
        assert_eq!(safe_filename("C:\\tmp\\a?.txt"), "a_.txt");
        assert_eq!(safe_filename(".."), "attachment");
        assert_eq!(safe_filename(""), "attachment");
    }

    #[test]
    fn test_numbered() {
        assert_eq!(numbered("report.pdf", 1), "report_1.pdf");
        assert_eq!(numbered("README", 2), "README_2");
        assert_eq!(numbered(".env", 1), ".env_1");
    }

    #[test]
    fn test_paths_for() {
        let store = store(Path::new("/srv"));
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 10, 5, 9).unwrap();
        let paths = store.paths_for(at, "Invoice #42", Uid::new(17).unwrap());
        assert_eq!(
            paths.raw_path,
            PathBuf::from("/srv/mail/20240304_100509_Invoice 42_17.eml")
        );
        assert_eq!(
            paths.html_path,
            PathBuf::from("/srv/mail/20240304_100509_Invoice 42_17_display.html")
        );
    }

    #[tokio::test]
    async fn test_write_message_and_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();

        let paths = store
            .write_message(Utc::now(), "Hi", Uid::new(1).unwrap(), b"raw", "<html></html>")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&paths.raw_path).unwrap(), b"raw");

        let first = store.write_attachment(7, &attachment("r.pdf")).await.unwrap();
        let second = store.write_attachment(7, &attachment("r.pdf")).await.unwrap();
        assert_eq!(first.file_name().unwrap(), "r.pdf");
        assert_eq!(second.file_name().unwrap(), "r_1.pdf");
        assert!(first.starts_with(dir.path().join("mail").join("attachments").join("7")));
    }

    #[tokio::test]
    async fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();

        let info = EmailInfo {
            subject: "Hello".to_string(),
            ..EmailInfo::default()
        };
        let summary = Summary {
            id: 5,
            timestamp: Utc::now(),
            info: &info,
            content: SummaryContent::new(&"x".repeat(2000), Path::new("m.html"), &[attachment("a.pdf")]),
            processed_time: Utc::now(),
        };

        let path = store.write_summary(&summary).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["id"], 5);
        assert_eq!(json["info"]["subject"], "Hello");
        assert_eq!(json["content"]["text"].as_str().unwrap().len(), 1000);
        assert_eq!(json["content"]["attachments"][0]["filename"], "a.pdf");
    }

    #[tokio::test]
    async fn test_summary_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(&StorageSettings {
            save_dir: dir.path().to_path_buf(),
            attachments_dir: None,
            summary_dir: PathBuf::new(),
            database_url: String::new(),
        });
        let info = EmailInfo::default();
        let summary = Summary {
            id: 1,
            timestamp: Utc::now(),
            info: &info,
            content: SummaryContent::new("", Path::new("x"), &[]),
            processed_time: Utc::now(),
        };
        assert!(store.write_summary(&summary).await.unwrap().is_none());
    }
}
