//! Integration tests for the IMAP client.
//!
//! A scripted stream replays a server transcript so a whole polling session
//! runs without a real server.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailingest_imap::{Client, Error, Uid};

/// Stream that replays server bytes and records what the client sent.
struct ScriptedStream {
    responses: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedStream {
    fn new(responses: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            responses: Cursor::new(responses.to_vec()),
            sent: Arc::clone(&sent),
        };
        (stream, sent)
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let data = self.responses.get_ref();
        let pos = usize::try_from(self.responses.position()).unwrap();

        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let to_read = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..to_read]);
        self.responses.set_position((pos + to_read) as u64);

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_polling_session() {
    let transcript: &[u8] = b"* OK [CAPABILITY IMAP4rev1 LITERAL+] ready\r\n\
A0001 OK [CAPABILITY IMAP4rev1 IDLE] logged in\r\n\
* FLAGS (\\Answered \\Seen)\r\n\
* 2 EXISTS\r\n\
* 0 RECENT\r\n\
* OK [UIDVALIDITY 77] UIDs valid\r\n\
* OK [UIDNEXT 13] next\r\n\
A0002 OK [READ-ONLY] EXAMINE completed\r\n\
* SEARCH 12 4\r\n\
A0003 OK SEARCH completed\r\n\
* 1 FETCH (UID 4 BODY[HEADER] {14}\r\nSubject: one\r\n)\r\n\
* 2 FETCH (UID 12 BODY[HEADER] {14}\r\nSubject: two\r\n)\r\n\
A0004 OK FETCH completed\r\n\
* 2 FETCH (UID 12 BODY[] {20}\r\nSubject: two\r\n\r\nhi\r\n)\r\n\
A0005 OK FETCH completed\r\n\
* BYE logging out\r\n\
A0006 OK LOGOUT completed\r\n";

    let (stream, sent) = ScriptedStream::new(transcript);
    let client = Client::from_stream(stream, TIMEOUT).await.unwrap();
    assert!(client.has_capability("LITERAL+"));

    let client = client.login("ingest@corp.example", "secret").await.unwrap();
    let (mut inbox, status) = client.examine("INBOX").await.unwrap();
    assert_eq!(status.exists, 2);
    assert_eq!(status.uid_validity.unwrap().get(), 77);
    assert!(status.read_only);

    let uids = inbox.uid_search_all().await.unwrap();
    assert_eq!(uids, vec![Uid::new(4).unwrap(), Uid::new(12).unwrap()]);

    let headers = inbox.fetch_headers(&uids).await.unwrap();
    assert_eq!(headers.len(), 2);
    assert_eq!(headers[1].1, b"Subject: two\r\n");

    let full = inbox.fetch_messages(&[Uid::new(12).unwrap()]).await.unwrap();
    assert_eq!(full[0].1, b"Subject: two\r\n\r\nhi\r\n");

    inbox.logout().await;

    let sent = String::from_utf8(sent.lock().unwrap().clone()).unwrap();
    let commands: Vec<&str> = sent.lines().collect();
    assert_eq!(
        commands,
        vec![
            "A0001 LOGIN \"ingest@corp.example\" \"secret\"",
            "A0002 EXAMINE \"INBOX\"",
            "A0003 UID SEARCH ALL",
            "A0004 UID FETCH 4,12 (UID BODY.PEEK[HEADER])",
            "A0005 UID FETCH 12 (UID BODY.PEEK[])",
            "A0006 LOGOUT",
        ]
    );
}

#[tokio::test]
async fn test_login_rejected() {
    let (stream, _) = ScriptedStream::new(
        b"* OK ready\r\nA0001 NO [AUTHENTICATIONFAILED] invalid credentials\r\n",
    );
    let client = Client::from_stream(stream, TIMEOUT).await.unwrap();
    let err = client.login("user", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn test_greeting_bye() {
    let (stream, _) = ScriptedStream::new(b"* BYE too many connections\r\n");
    let err = Client::from_stream(stream, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, Error::Bye(text) if text == "too many connections"));
}

#[tokio::test]
async fn test_server_hangup_mid_command() {
    let (stream, _) = ScriptedStream::new(b"* OK ready\r\n");
    let client = Client::from_stream(stream, TIMEOUT).await.unwrap();
    let err = client.login("user", "pw").await.unwrap_err();
    assert!(err.is_transient());
}
