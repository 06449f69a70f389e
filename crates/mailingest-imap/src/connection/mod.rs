//! Transport, framing and the type-state client.

pub mod client;
mod config;
mod framed;
mod stream;

pub use client::{Authenticated, Client, FetchedMessage, NotAuthenticated, Selected};
pub use config::{Config, ConfigBuilder, Security};
pub use framed::{FramedStream, MAX_LINE_LENGTH, MAX_LITERAL_SIZE};
pub use stream::{ImapStream, connect, tls_connector};

impl Client<ImapStream, NotAuthenticated> {
    /// Connects per `config` and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, TLS handshake or greeting fails
    /// or exceeds its timeout.
    pub async fn connect(config: &Config) -> crate::Result<Self> {
        let stream = stream::connect(config).await?;
        tracing::debug!(
            host = %config.host,
            port = config.port,
            tls = stream.is_tls(),
            "imap connected"
        );
        Self::from_stream(stream, config.io_timeout).await
    }
}
