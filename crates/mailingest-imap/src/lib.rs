//! # mailingest-imap
//!
//! A small async IMAP client for polling one mailbox by UID.
//!
//! It implements exactly what an ingestion poller needs: greeting, LOGIN,
//! EXAMINE, `UID SEARCH ALL`, `UID FETCH` with `BODY.PEEK` and LOGOUT. Fetches use `BODY.PEEK[...]`, so polling never marks mail as read.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailingest_imap::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> mailingest_imap::Result<()> {
//!     let config = Config::builder("imap.corp.example").build();
//!     let client = Client::connect(&config).await?;
//!     let client = client.login("ingest@corp.example", "secret").await?;
//!
//!     let (mut inbox, status) = client.examine("INBOX").await?;
//!     println!("{} messages, UIDVALIDITY {:?}", status.exists, status.uid_validity);
//!
//!     let uids = inbox.uid_search_all().await?;
//!     for (uid, header) in inbox.fetch_headers(&uids).await? {
//!         println!("{uid}: {} header bytes", header.len());
//!     }
//!
//!     inbox.logout().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! NotAuthenticated ── login() ──▶ Authenticated ── examine() ──▶ Selected
//!        │                              │                          │
//!        └──────────────────────────────┴─────── logout() ─────────┘
//! ```
//!
//! Every command round trip is bounded by [`Config::io_timeout`]; a stalled
//! server surfaces as [`Error::Timeout`] instead of a hung poller.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::{Command, FetchItems, TagGenerator};
pub use connection::{
    Authenticated, Client, Config, ConfigBuilder, FetchedMessage, ImapStream, NotAuthenticated,
    Security, Selected,
};
pub use error::{Error, Result};
pub use parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
pub use types::{MailboxStatus, ResponseCode, Status, Tag, Uid, UidValidity};
