//! Mailbox selection.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::Client;
use super::states::{Authenticated, Selected};
use crate::Result;
use crate::command::Command;
use crate::parser::UntaggedResponse;
use crate::types::{MailboxStatus, ResponseCode};

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Opens `mailbox` read-only. Fetches never alter flags.
    pub async fn examine(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let command = Command::Examine {
            mailbox: mailbox.to_string(),
        };
        let responses = self.execute(&command).await?;
        let mut status = mailbox_status(&responses);
        status.read_only = true;

        debug!(
            mailbox,
            exists = status.exists,
            uid_validity = ?status.uid_validity.map(|v| v.get()),
            "mailbox opened"
        );

        let selected = Selected {
            mailbox: mailbox.to_string(),
        };
        Ok((self.transition(selected), status))
    }

    /// Ends the session.
    pub async fn logout(self) {
        self.finish().await;
    }
}

/// Collects the SELECT/EXAMINE untagged data into a [`MailboxStatus`].
pub(crate) fn mailbox_status(responses: &[UntaggedResponse]) -> MailboxStatus {
    let mut status = MailboxStatus::default();

    for response in responses {
        match response {
            UntaggedResponse::Exists(n) => status.exists = *n,
            UntaggedResponse::Recent(n) => status.recent = *n,
            UntaggedResponse::Condition {
                code: Some(code), ..
            } => match code {
                ResponseCode::UidValidity(v) => status.uid_validity = Some(*v),
                ResponseCode::UidNext(u) => status.uid_next = Some(*u),
                ResponseCode::ReadOnly => status.read_only = true,
                _ => {}
            },
            _ => {}
        }
    }

    status
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
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::Error;

    const SELECT_DATA: &[&[u8]] = &[
        b"* 4 EXISTS\r\n",
        b"* 0 RECENT\r\n",
        b"* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n",
        b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n",
        b"* OK [UIDNEXT 4392] Predicted next UID\r\n",
    ];

    fn session(builder: &mut Builder) -> &mut Builder {
        builder
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN \"u\" \"p\"\r\n")
            .read(b"A0001 OK\r\n")
    }

    #[tokio::test]
    async fn test_examine_reports_status() {
        let mut builder = Builder::new();
        session(&mut builder).write(b"A0002 EXAMINE \"INBOX\"\r\n");
        for line in SELECT_DATA {
            builder.read(line);
        }
        let mock = builder.read(b"A0002 OK [READ-ONLY] EXAMINE completed\r\n").build();

        let client = Client::from_stream(mock, Duration::from_secs(5))
            .await
            .unwrap()
            .login("u", "p")
            .await
            .unwrap();
        let (selected, status) = client.examine("INBOX").await.unwrap();

        assert_eq!(status.exists, 4);
        assert_eq!(status.uid_validity.unwrap().get(), 3_857_529_045);
        assert_eq!(status.uid_next.unwrap().get(), 4392);
        assert!(status.read_only);
        assert_eq!(selected.state.mailbox(), "INBOX");
    }

    #[tokio::test]
    async fn test_examine_missing_mailbox() {
        let mut builder = Builder::new();
        let mock = session(&mut builder)
            .write(b"A0002 EXAMINE \"Nope\"\r\n")
            .read(b"A0002 NO [NONEXISTENT] no such mailbox\r\n")
            .build();

        let client = Client::from_stream(mock, Duration::from_secs(5))
            .await
            .unwrap()
            .login("u", "p")
            .await
            .unwrap();
        let err = client.examine("Nope").await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
    }
}
