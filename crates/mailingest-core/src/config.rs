//! Pipeline settings.
//!
//! Settings are read from TOML. Every key has a default except
//! `monitor.target_domain`, so a minimal file is:
//!
//! ```toml
//! [imap]
//! host = "imap.corp.example"
//! username = "ingest@corp.example"
//!
//! [monitor]
//! target_domain = "corp.example"
//! ```
//!
//! The password is normally supplied through the environment rather than
//! the file and is never written back out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::{Backoff, RetryPolicy};
use crate::{Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MAILINGEST_CONFIG";

/// Transport security for the mail server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSecurity {
    /// Implicit TLS.
    #[default]
    Tls,
    /// Plain TCP, for local test servers only.
    None,
}

/// Mail server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport security.
    pub security: TransportSecurity,
    /// Login name.
    pub username: String,
    /// Login password.
    #[serde(skip_serializing)]
    pub password: String,
    /// Mailbox to poll.
    pub mailbox: String,
    /// Connect plus TLS handshake bound, in seconds.
    pub connect_timeout_secs: u64,
    /// Per-command bound, in seconds.
    pub io_timeout_secs: u64,
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            host: "imap.qq.com".to_string(),
            port: 993,
            security: TransportSecurity::Tls,
            username: String::new(),
            password: String::new(),
            mailbox: "INBOX".to_string(),
            connect_timeout_secs: 30,
            io_timeout_secs: 60,
        }
    }
}

impl ImapSettings {
    /// Builds the IMAP client configuration.
    #[must_use]
    pub fn client_config(&self) -> mailingest_imap::Config {
        let security = match self.security {
            TransportSecurity::Tls => mailingest_imap::Security::Implicit,
            TransportSecurity::None => mailingest_imap::Security::None,
        };
        mailingest_imap::Config::builder(&self.host)
            .port(self.port)
            .security(security)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .io_timeout(Duration::from_secs(self.io_timeout_secs))
            .build()
    }
}

/// Connection retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per cycle, including the first.
    pub max_attempts: u32,
    /// Delay between attempts, in seconds.
    pub delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_secs: 8,
        }
    }
}

impl RetrySettings {
    /// Returns the fixed-delay policy these settings describe.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.delay_secs),
            backoff: Backoff::Fixed,
        }
    }
}

/// Poll monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Recipient domain of interest. Required.
    pub target_domain: String,
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Messages scanned when there is no usable cursor.
    pub first_scan_window: usize,
    /// Connection retry.
    pub retry: RetrySettings,
    /// Hours a UID stays in the seen ledger.
    pub seen_retention_hours: u64,
    /// Maximum UIDs held in the seen ledger.
    pub seen_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            target_domain: String::new(),
            poll_interval_secs: 6,
            first_scan_window: 10,
            retry: RetrySettings::default(),
            seen_retention_hours: 72,
            seen_capacity: 50_000,
        }
    }
}

impl MonitorSettings {
    /// Returns the poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the seen-ledger retention.
    #[must_use]
    pub const fn seen_retention(&self) -> Duration {
        Duration::from_secs(self.seen_retention_hours * 3600)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Number of workers.
    pub count: usize,
    /// Queue capacity; the monitor waits when it is full.
    pub queue_capacity: usize,
    /// Seconds a worker waits on an empty queue before looping.
    pub pop_timeout_secs: u64,
    /// Seconds allowed for draining on shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 2,
            queue_capacity: 256,
            pop_timeout_secs: 30,
            drain_timeout_secs: 30,
        }
    }
}

impl WorkerSettings {
    /// Returns the pop timeout.
    #[must_use]
    pub const fn pop_timeout(&self) -> Duration {
        Duration::from_secs(self.pop_timeout_secs)
    }

    /// Returns the drain timeout.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Artifact and database locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for raw `.eml` and reconstructed HTML files.
    pub save_dir: PathBuf,
    /// Directory for attachment payloads. Defaults to `<save_dir>/attachments`.
    pub attachments_dir: Option<PathBuf>,
    /// Directory for summary JSON records. Empty disables summaries.
    pub summary_dir: PathBuf,
    /// sqlx connection URL for the email store.
    pub database_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("./received_emails"),
            attachments_dir: None,
            summary_dir: PathBuf::from("./frontend_queue"),
            database_url: "sqlite:mailingest.db?mode=rwc".to_string(),
        }
    }
}

impl StorageSettings {
    /// Returns the effective attachments directory.
    #[must_use]
    pub fn attachments_dir(&self) -> PathBuf {
        self.attachments_dir
            .clone()
            .unwrap_or_else(|| self.save_dir.join("attachments"))
    }

    /// Returns the summary directory, or `None` when disabled.
    #[must_use]
    pub fn summary_dir(&self) -> Option<&Path> {
        (!self.summary_dir.as_os_str().is_empty()).then_some(self.summary_dir.as_path())
    }
}

/// Content-selection thresholds, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    /// Minimum HTML body length to trust the HTML rendering.
    pub min_html_len: usize,
    /// Minimum text body length to prefer wrapped text.
    pub min_text_len: usize,
    /// Minimum cached preview length to prefer it.
    pub min_cached_len: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            min_html_len: 100,
            min_text_len: 50,
            min_cached_len: 50,
        }
    }
}

/// All pipeline settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Mail server.
    pub imap: ImapSettings,
    /// Poll monitor.
    pub monitor: MonitorSettings,
    /// Worker pool.
    pub workers: WorkerSettings,
    /// Artifacts and database.
    pub storage: StorageSettings,
    /// Content selection.
    pub connector: ConnectorSettings,
}

impl Settings {
    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for these settings.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads settings from the first config file found.
    ///
    /// Search order: `explicit`, then `$MAILINGEST_CONFIG`, then
    /// `<config dir>/mailingest/config.toml`. With no file, defaults are
    /// returned. An explicitly named file that does not exist is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a named file is missing or a found file fails
    /// to parse.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let path = match named {
            Some(path) => {
                if !path.is_file() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Some(path)
            }
            None => default_path().filter(|p| p.is_file()),
        };

        let Some(path) = path else {
            debug!("no config file found, using defaults");
            return Ok((Self::default(), None));
        };

        let text = std::fs::read_to_string(&path)?;
        let settings = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "loaded config file");
        Ok((settings, Some(path)))
    }

    /// Checks the settings for values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.target_domain.trim().is_empty() {
            return Err(Error::Config("monitor.target_domain must not be empty".to_string()));
        }
        if self.workers.count == 0 {
            return Err(Error::Config("workers.count must be at least 1".to_string()));
        }
        if self.workers.queue_capacity == 0 {
            return Err(Error::Config(
                "workers.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.monitor.retry.max_attempts == 0 {
            return Err(Error::Config(
                "monitor.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.monitor.first_scan_window == 0 {
            return Err(Error::Config(
                "monitor.first_scan_window must be at least 1".to_string(),
            ));
        }
        for (key, secs) in [
            ("monitor.poll_interval_secs", self.monitor.poll_interval_secs),
            ("workers.pop_timeout_secs", self.workers.pop_timeout_secs),
            ("workers.drain_timeout_secs", self.workers.drain_timeout_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }
}

/// Returns `<config dir>/mailingest/config.toml`, if a config dir exists.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mailingest").join("config.toml"))
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

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.imap.port, 993);
        assert_eq!(settings.monitor.poll_interval(), Duration::from_secs(6));
        assert_eq!(settings.monitor.first_scan_window, 10);
        assert_eq!(settings.workers.count, 2);
        assert_eq!(settings.connector.min_html_len, 100);
        assert_eq!(
            settings.storage.attachments_dir(),
            PathBuf::from("./received_emails/attachments")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [imap]
            host = "mail.corp.example"
            security = "none"
            port = 1143

            [monitor]
            target_domain = "corp.example"

            [monitor.retry]
            max_attempts = 2

            [storage]
            summary_dir = ""
            "#,
        )
        .unwrap();

        assert_eq!(settings.imap.host, "mail.corp.example");
        assert_eq!(settings.imap.security, TransportSecurity::None);
        assert_eq!(settings.imap.mailbox, "INBOX");
        assert_eq!(settings.monitor.retry.max_attempts, 2);
        assert_eq!(settings.monitor.retry.delay_secs, 8);
        assert!(settings.storage.summary_dir().is_none());
        settings.validate().unwrap();

        let client = settings.imap.client_config();
        assert_eq!(client.port, 1143);
        assert_eq!(client.security, mailingest_imap::Security::None);
    }

    #[test]
    fn test_validate_rejects() {
        let mut settings = Settings::default();
        assert!(matches!(settings.validate(), Err(Error::Config(m)) if m.contains("target_domain")));

        settings.monitor.target_domain = "corp.example".to_string();
        settings.workers.count = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(m)) if m.contains("workers.count")));

        settings.workers.count = 2;
        settings.workers.queue_capacity = 0;
        assert!(settings.validate().is_err());

        settings.workers.queue_capacity = 1;
        settings.monitor.retry.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut settings = Settings::default();
        settings.monitor.target_domain = "corp.example".to_string();
        settings.validate().unwrap();

        settings.monitor.poll_interval_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(Error::Config(m)) if m.contains("poll_interval_secs")
        ));

        settings.monitor.poll_interval_secs = 6;
        settings.workers.pop_timeout_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(Error::Config(m)) if m.contains("pop_timeout_secs")
        ));

        settings.workers.pop_timeout_secs = 30;
        settings.workers.drain_timeout_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(Error::Config(m)) if m.contains("drain_timeout_secs")
        ));
    }

    #[test]
    fn test_password_not_serialized() {
        let mut settings = Settings::default();
        settings.imap.password = "hunter2".to_string();
        let text = toml::to_string(&settings).unwrap();
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\ntarget_domain = \"corp.example\"\n").unwrap();

        let (settings, found) = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.monitor.target_domain, "corp.example");
        assert_eq!(found, Some(path));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(Settings::load(Some(&missing)), Err(Error::Config(_))));
    }
}
