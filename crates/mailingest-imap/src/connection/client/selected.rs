//! Search and fetch in an open mailbox.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::Client;
use super::states::Selected;
use crate::Result;
use crate::command::{Command, FetchItems};
use crate::parser::{FetchItem, UntaggedResponse};
use crate::types::Uid;

/// One `* n FETCH` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message sequence number at fetch time.
    pub seq: u32,
    /// Returned data items.
    pub items: Vec<FetchItem>,
}

impl FetchedMessage {
    /// Returns the message UID, if the server included it.
    #[must_use]
    pub fn uid(&self) -> Option<Uid> {
        self.items.iter().find_map(|item| match item {
            FetchItem::Uid(uid) => Some(*uid),
            _ => None,
        })
    }

    /// Returns the bytes of `BODY[section]`. NIL bodies yield `None`.
    #[must_use]
    pub fn body(&self, section: &str) -> Option<&[u8]> {
        self.items.iter().find_map(|item| match item {
            FetchItem::Body {
                section: s,
                data: Some(data),
            } if s.eq_ignore_ascii_case(section) => Some(data.as_slice()),
            _ => None,
        })
    }

    /// Returns the header block from a [`FetchItems::Header`] fetch.
    #[must_use]
    pub fn header(&self) -> Option<&[u8]> {
        self.body("HEADER")
    }

    /// Returns the full message from a [`FetchItems::Full`] fetch.
    #[must_use]
    pub fn message(&self) -> Option<&[u8]> {
        self.body("")
    }
}

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the open mailbox's name.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        self.state.mailbox()
    }

    /// Lists every UID in the mailbox, ascending.
    pub async fn uid_search_all(&mut self) -> Result<Vec<Uid>> {
        let responses = self.execute(&Command::UidSearchAll).await?;

        let mut uids: Vec<Uid> = responses
            .into_iter()
            .filter_map(|r| match r {
                UntaggedResponse::Search(ids) => Some(ids),
                _ => None,
            })
            .flatten()
            .filter_map(Uid::new)
            .collect();
        uids.sort_unstable();
        uids.dedup();

        debug!(mailbox = %self.state.mailbox, count = uids.len(), "uid search");
        Ok(uids)
    }

    /// Fetches `items` for `uids`. An empty UID list sends nothing.
    ///
    /// UIDs that no longer exist are silently absent from the result, as
    /// servers do not report them.
    pub async fn uid_fetch(&mut self, uids: &[Uid], items: FetchItems) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let command = Command::UidFetch {
            uids: uids.to_vec(),
            items,
        };
        let responses = self.execute(&command).await?;

        Ok(responses
            .into_iter()
            .filter_map(|r| match r {
                UntaggedResponse::Fetch { seq, items } => Some(FetchedMessage { seq, items }),
                _ => None,
            })
            .collect())
    }

    /// Fetches header blocks for `uids` without setting `\Seen`.
    pub async fn fetch_headers(&mut self, uids: &[Uid]) -> Result<Vec<(Uid, Vec<u8>)>> {
        let fetched = self.uid_fetch(uids, FetchItems::Header).await?;
        Ok(collect_sections(fetched, FetchedMessage::header))
    }

    /// Fetches full messages for `uids` without setting `\Seen`.
    pub async fn fetch_messages(&mut self, uids: &[Uid]) -> Result<Vec<(Uid, Vec<u8>)>> {
        let fetched = self.uid_fetch(uids, FetchItems::Full).await?;
        Ok(collect_sections(fetched, FetchedMessage::message))
    }

    /// Ends the session.
    pub async fn logout(self) {
        self.finish().await;
    }
}

/// Pairs each fetched message's UID with the chosen section's bytes.
///
/// Unsolicited FETCH responses (flag updates without a body) are dropped.
fn collect_sections(
    fetched: Vec<FetchedMessage>,
    section: fn(&FetchedMessage) -> Option<&[u8]>,
) -> Vec<(Uid, Vec<u8>)> {
    fetched
        .iter()
        .filter_map(|m| Some((m.uid()?, section(m)?.to_vec())))
        .collect()
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

    use tokio_test::io::{Builder, Mock};

    use super::*;

    async fn examined(mock: Mock) -> Client<Mock, Selected> {
        let client = Client::from_stream(mock, Duration::from_secs(5))
            .await
            .unwrap()
            .login("u", "p")
            .await
            .unwrap();
        client.examine("INBOX").await.unwrap().0
    }

    fn builder() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN \"u\" \"p\"\r\n")
            .read(b"A0001 OK\r\n")
            .write(b"A0002 EXAMINE \"INBOX\"\r\n")
            .read(b"* 3 EXISTS\r\n")
            .read(b"* OK [UIDVALIDITY 7] ok\r\n")
            .read(b"A0002 OK [READ-ONLY] done\r\n");
        builder
    }

    #[tokio::test]
    async fn test_uid_search_all_sorted() {
        let mock = builder()
            .write(b"A0003 UID SEARCH ALL\r\n")
            .read(b"* SEARCH 12 3 7\r\n")
            .read(b"A0003 OK done\r\n")
            .build();
        let mut client = examined(mock).await;

        let uids = client.uid_search_all().await.unwrap();
        let values: Vec<u32> = uids.iter().map(|u| u.get()).collect();
        assert_eq!(values, vec![3, 7, 12]);
    }

    #[tokio::test]
    async fn test_fetch_headers_uses_peek() {
        let mock = builder()
            .write(b"A0003 UID FETCH 3,7 (UID BODY.PEEK[HEADER])\r\n")
            .read(b"* 1 FETCH (UID 3 BODY[HEADER] {14}\r\n")
            .read(b"Subject: one\r\n)\r\n")
            .read(b"* 2 FETCH (FLAGS (\\Seen))\r\n")
            .read(b"* 2 FETCH (UID 7 BODY[HEADER] {14}\r\n")
            .read(b"Subject: two\r\n)\r\n")
            .read(b"A0003 OK done\r\n")
            .build();
        let mut client = examined(mock).await;

        let uids = [Uid::new(3).unwrap(), Uid::new(7).unwrap()];
        let headers = client.fetch_headers(&uids).await.unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0.get(), 3);
        assert_eq!(headers[0].1, b"Subject: one\r\n");
        assert_eq!(headers[1].1, b"Subject: two\r\n");
    }

    #[tokio::test]
    async fn test_fetch_message_full_body() {
        let mock = builder()
            .write(b"A0003 UID FETCH 9 (UID BODY.PEEK[])\r\n")
            .read(b"* 3 FETCH (UID 9 BODY[] {5}\r\n")
            .read(b"hello)\r\n")
            .read(b"A0003 OK done\r\n")
            .build();
        let mut client = examined(mock).await;

        let messages = client.fetch_messages(&[Uid::new(9).unwrap()]).await.unwrap();
        assert_eq!(messages, vec![(Uid::new(9).unwrap(), b"hello".to_vec())]);
    }

    #[tokio::test]
    async fn test_empty_fetch_sends_nothing() {
        let mut client = examined(builder().build()).await;
        assert!(client.fetch_messages(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_accepts_bye() {
        let mock = builder()
            .write(b"A0003 LOGOUT\r\n")
            .read(b"* BYE logging out\r\n")
            .read(b"A0003 OK done\r\n")
            .build();
        let client = examined(mock).await;
        assert_eq!(client.mailbox(), "INBOX");
        client.logout().await;
    }
}
