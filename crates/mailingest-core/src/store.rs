//! Storage collaborator for ingested email records.
//!
//! [`EmailStore`] is the narrow interface the connector writes through;
//! [`SqliteEmailStore`] is the bundled implementation.

use std::future::Future;

use chrono::{DateTime, SubsecRound, Utc};
use mailingest_mime::EmailInfo;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::Result;

/// Identity of an email independent of any protocol identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    /// Bare sender address.
    pub sender: String,
    /// Bare address of the first recipient.
    pub receiver: String,
    /// Decoded subject.
    pub subject: String,
    /// Sent time at whole-second resolution.
    pub sent_at: DateTime<Utc>,
}

impl NaturalKey {
    /// Derives the key from envelope fields.
    ///
    /// `fallback` stands in for a missing or unreadable `Date` header.
    #[must_use]
    pub fn from_info(info: &EmailInfo, fallback: DateTime<Utc>) -> Self {
        Self {
            sender: info.sender_address(),
            receiver: info.receiver_address(),
            subject: info.subject.clone(),
            sent_at: info.sent_at().unwrap_or(fallback).trunc_subsecs(0),
        }
    }

    fn sent_at_column(&self) -> String {
        self.sent_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// An attachment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    /// Row id.
    pub id: i64,
    /// Owning email record.
    pub email_id: i64,
    /// File name.
    pub filename: String,
    /// Location of the payload on disk.
    pub path: String,
    /// Payload size in bytes.
    pub size_bytes: i64,
}

/// Persistent store for ingested email records.
///
/// Every call is a single attempt; the caller decides about retries.
pub trait EmailStore: Send + Sync + 'static {
    /// Looks up a record by natural key.
    fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> impl Future<Output = Result<Option<i64>>> + Send;

    /// Inserts a record and returns its id.
    fn save_email(
        &self,
        key: &NaturalKey,
        html_content: &str,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Inserts an attachment row and returns its id.
    fn save_attachment(
        &self,
        email_id: i64,
        filename: &str,
        path: &str,
        size_bytes: u64,
    ) -> impl Future<Output = Result<i64>> + Send;
}

/// SQLite-backed [`EmailStore`].
#[derive(Debug, Clone)]
pub struct SqliteEmailStore {
    pool: SqlitePool,
}

impl SqliteEmailStore {
    /// Connects to `url` and creates the schema if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema creation fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                html_content TEXT NOT NULL DEFAULT '',
                sent_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(sender, receiver, subject, sent_at)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id INTEGER NOT NULL REFERENCES emails(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_attachments_email
            ON attachments(email_id)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of email records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_emails(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM emails")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Stored HTML of a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn html_content(&self, email_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT html_content FROM emails WHERE id = ?")
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("html_content")))
    }

    /// Attachment rows of a record, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn attachments(&self, email_id: i64) -> Result<Vec<StoredAttachment>> {
        let rows = sqlx::query(
            r"
            SELECT id, email_id, filename, path, size_bytes
            FROM attachments
            WHERE email_id = ?
            ORDER BY id
            ",
        )
        .bind(email_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredAttachment {
                id: row.get("id"),
                email_id: row.get("email_id"),
                filename: row.get("filename"),
                path: row.get("path"),
                size_bytes: row.get("size_bytes"),
            })
            .collect())
    }
}

impl EmailStore for SqliteEmailStore {
    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<i64>> {
        let row = sqlx::query(
            r"
            SELECT id FROM emails
            WHERE sender = ? AND receiver = ? AND subject = ? AND sent_at = ?
            ",
        )
        .bind(&key.sender)
        .bind(&key.receiver)
        .bind(&key.subject)
        .bind(key.sent_at_column())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    async fn save_email(&self, key: &NaturalKey, html_content: &str) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO emails (sender, receiver, subject, html_content, sent_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&key.sender)
        .bind(&key.receiver)
        .bind(&key.subject)
        .bind(html_content)
        .bind(key.sent_at_column())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn save_attachment(
        &self,
        email_id: i64,
        filename: &str,
        path: &str,
        size_bytes: u64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO attachments (email_id, filename, path, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(email_id)
        .bind(filename)
        .bind(path)
        .bind(i64::try_from(size_bytes).unwrap_or(i64::MAX))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
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

    fn key(subject: &str) -> NaturalKey {
        NaturalKey {
            sender: "alice@example.com".to_string(),
            receiver: "team@corp.example".to_string(),
            subject: subject.to_string(),
            sent_at: Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_natural_key_from_info() {
        let info = EmailInfo {
            from: "Alice <Alice@Example.com>".to_string(),
            to: "Team <team@corp.example>, other@corp.example".to_string(),
            subject: "Q3".to_string(),
            date: "Mon, 4 Mar 2024 10:00:00 +0000".to_string(),
            ..EmailInfo::default()
        };
        let key = NaturalKey::from_info(&info, Utc::now());
        assert_eq!(key.receiver, "team@corp.example");
        assert_eq!(key.subject, "Q3");
        assert_eq!(key.sent_at, Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_natural_key_fallback_truncates_subsecs() {
        let fallback = Utc.timestamp_millis_opt(1_709_546_400_750).unwrap();
        let key = NaturalKey::from_info(&EmailInfo::default(), fallback);
        assert_eq!(key.sent_at.timestamp(), 1_709_546_400);
        assert_eq!(key.sent_at.timestamp_subsec_millis(), 0);
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = SqliteEmailStore::in_memory().await.unwrap();
        assert!(store.find_by_natural_key(&key("a")).await.unwrap().is_none());

        let id = store.save_email(&key("a"), "<p>a</p>").await.unwrap();
        assert_eq!(store.find_by_natural_key(&key("a")).await.unwrap(), Some(id));
        assert!(store.find_by_natural_key(&key("b")).await.unwrap().is_none());
        assert_eq!(store.html_content(id).await.unwrap().as_deref(), Some("<p>a</p>"));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = SqliteEmailStore::in_memory().await.unwrap();
        store.save_email(&key("a"), "").await.unwrap();
        assert!(store.save_email(&key("a"), "").await.is_err());
        assert_eq!(store.count_emails().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_attachments() {
        let store = SqliteEmailStore::in_memory().await.unwrap();
        let id = store.save_email(&key("a"), "").await.unwrap();
        store.save_attachment(id, "r.pdf", "/tmp/r.pdf", 12).await.unwrap();
        store.save_attachment(id, "s.png", "/tmp/s.png", 34).await.unwrap();

        let rows = store.attachments(id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filename, "r.pdf");
        assert_eq!(rows[1].size_bytes, 34);
    }
}
