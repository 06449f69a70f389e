//! Error types for the ingestion pipeline.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] mailingest_imap::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization failed.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation exceeded its time bound.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The work queue was closed while sending.
    #[error("Work queue closed")]
    QueueClosed,

    /// The storage collaborator rejected a write.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Failure classes used for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or authentication hiccup. Retried within a cycle, otherwise
    /// deferred to the next one.
    TransientConnection,
    /// Unusable input. Skipped at the smallest granularity.
    MalformedInput,
    /// Storage or filesystem write failed. Reported, never requeued.
    PersistenceFailure,
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Imap(_)
            | Self::Timeout(_)
            | Self::Database(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut) => {
                ErrorKind::TransientConnection
            }
            Self::ConfigParse(_) | Self::Config(_) => ErrorKind::MalformedInput,
            Self::Database(_) | Self::Serde(_) | Self::Io(_) | Self::QueueClosed | Self::Storage(_) => {
                ErrorKind::PersistenceFailure
            }
        }
    }

    /// Returns true if a fresh attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientConnection)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

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

    #[test]
    fn test_kinds() {
        let imap = Error::Imap(mailingest_imap::Error::Auth("denied".to_string()));
        assert_eq!(imap.kind(), ErrorKind::TransientConnection);
        assert!(imap.is_transient());

        assert_eq!(
            Error::Config("empty".to_string()).kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(
            Error::Storage("locked".to_string()).kind(),
            ErrorKind::PersistenceFailure
        );
        assert!(!Error::QueueClosed.is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
