//! Greeting and login.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::Client;
use super::states::{Authenticated, NotAuthenticated};
use crate::command::{Command, TagGenerator};
use crate::connection::framed::FramedStream;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{ResponseCode, Status};
use crate::{Error, Result};

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting from a freshly connected transport.
    ///
    /// `io_timeout` bounds the greeting and every later command.
    pub async fn from_stream(stream: S, io_timeout: Duration) -> Result<Self> {
        let mut framed = FramedStream::new(stream);

        let greeting = tokio::time::timeout(io_timeout, framed.read_response())
            .await
            .map_err(|_| Error::Timeout(io_timeout))??;

        let mut capabilities = Vec::new();
        match ResponseParser::parse(&greeting)? {
            Response::Untagged(UntaggedResponse::Condition {
                status: Status::Ok | Status::PreAuth,
                code,
                ..
            }) => {
                if let Some(ResponseCode::Capability(caps)) = code {
                    capabilities = caps;
                }
            }
            Response::Untagged(UntaggedResponse::Condition {
                status: Status::Bye,
                text,
                ..
            }) => return Err(Error::Bye(text)),
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }

        debug!(capabilities = capabilities.len(), "imap greeting received");

        Ok(Self {
            stream: framed,
            tags: TagGenerator::default(),
            capabilities,
            io_timeout,
            state: NotAuthenticated,
        })
    }

    /// Logs in with a user name and password.
    ///
    /// A NO completion is reported as [`Error::Auth`].
    pub async fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        if [username, password]
            .iter()
            .any(|s| s.contains(['\r', '\n', '\0']))
        {
            return Err(Error::Auth("credentials contain line breaks".to_string()));
        }

        let command = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        let responses = match self.execute(&command).await {
            Ok(responses) => responses,
            Err(Error::No(text)) => return Err(Error::Auth(text)),
            Err(e) => return Err(e),
        };

        for response in responses {
            if let UntaggedResponse::Capability(caps) = response {
                self.capabilities = caps;
            }
        }

        Ok(self.transition(Authenticated))
    }

    /// Ends the session.
    pub async fn logout(self) {
        self.finish().await;
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
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_greeting_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] hello\r\n")
            .build();
        let client = Client::from_stream(mock, TIMEOUT).await.unwrap();
        assert!(client.has_capability("AUTH=PLAIN"));
    }

    #[tokio::test]
    async fn test_greeting_bye() {
        let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
        let err = Client::from_stream(mock, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::Bye(t) if t == "too many connections"));
    }

    #[tokio::test]
    async fn test_login_success() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN \"ingest@corp.example\" \"secret\"\r\n")
            .read(b"A0001 OK [CAPABILITY IMAP4rev1 UIDPLUS] logged in\r\n")
            .build();
        let client = Client::from_stream(mock, TIMEOUT).await.unwrap();
        client.login("ingest@corp.example", "secret").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_rejected_is_auth_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN \"ingest\" \"wrong\"\r\n")
            .read(b"A0001 NO [AUTHENTICATIONFAILED] invalid credentials\r\n")
            .build();
        let client = Client::from_stream(mock, TIMEOUT).await.unwrap();
        let err = client.login("ingest", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Auth(t) if t == "invalid credentials"));
    }

    #[tokio::test]
    async fn test_login_rejects_crlf_injection() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let client = Client::from_stream(mock, TIMEOUT).await.unwrap();
        let err = client
            .login("ingest", "x\r\nA0002 DELETE INBOX")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
