//! Type-state IMAP client.
//!
//! A session moves through three states, each exposing only the commands
//! valid there:
//!
//! - [`NotAuthenticated`]: after the greeting
//! - [`Authenticated`]: after LOGIN
//! - [`Selected`]: after EXAMINE
//!
//! Transitions consume the client, so an unauthenticated session cannot
//! open a mailbox or fetch from one.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

pub use self::selected::FetchedMessage;
pub use self::states::{Authenticated, NotAuthenticated, Selected};
use super::framed::FramedStream;
use crate::command::{Command, TagGenerator};
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::Status;
use crate::{Error, Result};

/// IMAP client in state `State`.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tags: TagGenerator,
    pub(crate) capabilities: Vec<String>,
    pub(crate) io_timeout: Duration,
    pub(crate) state: State,
}

impl<S, State: std::fmt::Debug> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns true if the server advertised `cap` (case-insensitive).
    #[must_use]
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(cap))
    }

    /// Runs one command to completion and returns its untagged responses.
    ///
    /// The whole round trip is bounded by the session's I/O timeout. A
    /// non-OK completion becomes the matching error; an untagged BYE takes
    /// precedence over the tagged status.
    pub(crate) async fn execute(&mut self, command: &Command) -> Result<Vec<UntaggedResponse>> {
        let tag = self.tags.next_tag();
        debug!(tag = %tag, command = %command.redacted(), "imap command");

        let limit = self.io_timeout;
        let raw = tokio::time::timeout(limit, async {
            self.stream.write_command(&command.serialize(&tag)).await?;
            self.stream.read_until_tagged(&tag).await
        })
        .await
        .map_err(|_| Error::Timeout(limit))??;

        let mut untagged = Vec::with_capacity(raw.len());
        let mut completion = None;
        for bytes in &raw {
            trace!(bytes = bytes.len(), "imap response");
            match ResponseParser::parse(bytes)? {
                Response::Untagged(response) => untagged.push(response),
                Response::Tagged { status, text, .. } => completion = Some((status, text)),
                Response::Continuation(_) => {}
            }
        }

        if let Some(text) = untagged.iter().find_map(|r| match r {
            UntaggedResponse::Condition {
                status: Status::Bye,
                text,
                ..
            } => Some(text.clone()),
            _ => None,
        }) && !matches!(command, Command::Logout)
        {
            return Err(Error::Bye(text));
        }

        match completion {
            Some((Status::Ok | Status::PreAuth, _)) => Ok(untagged),
            Some((Status::No, text)) => Err(Error::No(text)),
            Some((Status::Bad, text)) => Err(Error::Bad(text)),
            Some((Status::Bye, text)) => Err(Error::Bye(text)),
            None => Err(Error::Protocol("missing tagged completion".to_string())),
        }
    }

    /// Moves the session into another state.
    pub(crate) fn transition<Next>(self, state: Next) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            capabilities: self.capabilities,
            io_timeout: self.io_timeout,
            state,
        }
    }

    /// Sends LOGOUT and shuts the transport down. Errors are ignored; the
    /// session is over either way.
    pub(crate) async fn finish(mut self) {
        if let Err(e) = self.execute(&Command::Logout).await {
            debug!(error = %e, "logout did not complete cleanly");
        }
        let _ = self.stream.shutdown().await;
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

    async fn greeted(mock: tokio_test::io::Mock) -> Client<tokio_test::io::Mock, NotAuthenticated> {
        Client::from_stream(mock, Duration::from_secs(5)).await.unwrap()
    }

    #[tokio::test]
    async fn test_login_capabilities_replace_greeting() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n")
            .write(b"A0001 LOGIN \"u\" \"p\"\r\n")
            .read(b"* CAPABILITY IMAP4rev1 LITERAL+\r\n")
            .read(b"A0001 OK done\r\n")
            .build();
        let client = greeted(mock).await.login("u", "p").await.unwrap();
        assert!(client.has_capability("literal+"));
        assert!(!client.has_capability("AUTH=PLAIN"));
    }

    #[tokio::test]
    async fn test_bad_completion_maps_to_error() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN \"u\" \"p\"\r\n")
            .read(b"A0001 BAD unknown command\r\n")
            .build();
        let client = greeted(mock).await;
        assert!(matches!(client.login("u", "p").await, Err(Error::Bad(t)) if t == "unknown command"));
    }

    #[tokio::test]
    async fn test_untagged_bye_wins() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN \"u\" \"p\"\r\n")
            .read(b"* BYE idle too long\r\n")
            .read(b"A0001 OK\r\n")
            .build();
        let client = greeted(mock).await;
        let err = client.login("u", "p").await.unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN \"u\" \"p\"\r\n")
            .wait(Duration::from_secs(60))
            .build();
        let client = greeted(mock).await;
        assert!(matches!(client.login("u", "p").await, Err(Error::Timeout(_))));
    }
}
