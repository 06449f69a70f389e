//! Connection settings.

use std::time::Duration;

/// Transport security for the IMAP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plain TCP. Only for local test servers.
    None,
    /// TLS from the first byte (IMAPS).
    #[default]
    Implicit,
}

impl Security {
    /// Returns the conventional port for this mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 143,
            Self::Implicit => 993,
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport security.
    pub security: Security,
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// Bound on any single command round trip.
    pub io_timeout: Duration,
}

impl Config {
    /// Creates a builder for `host` with IMAPS defaults.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            host: host.into(),
            port: None,
            security: Security::Implicit,
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
        }
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ConfigBuilder {
    /// Overrides the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the transport security.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-command timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Builds the configuration. The port defaults to the security mode's.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
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

    #[test]
    fn test_builder_defaults() {
        let config = Config::builder("mail.corp.example").build();
        assert_eq!(config.port, 993);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.address(), "mail.corp.example:993");
    }

    #[test]
    fn test_builder_plain_port() {
        let config = Config::builder("localhost")
            .security(Security::None)
            .io_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.port, 143);
        assert_eq!(config.io_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_explicit_port_wins() {
        let config = Config::builder("localhost").port(1993).build();
        assert_eq!(config.port, 1993);
    }
}
