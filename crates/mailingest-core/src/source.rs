//! Mail source abstraction used by the poll monitor.
//!
//! [`MailConnector`] opens a [`MailSession`] on one mailbox; the IMAP
//! implementation lives here and tests substitute a scripted one.

use std::future::Future;

use mailingest_imap::{Client, ImapStream, Selected, Uid, UidValidity};
use tracing::{debug, info};

use crate::Result;
use crate::config::ImapSettings;

/// Opens sessions on the polled mailbox.
pub trait MailConnector: Send + Sync {
    /// Session type produced by [`MailConnector::connect`].
    type Session: MailSession;

    /// Connects, authenticates and opens the mailbox read-only.
    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// An open mailbox.
pub trait MailSession: Send {
    /// `UIDVALIDITY` reported when the mailbox was opened.
    fn uid_validity(&self) -> Option<UidValidity>;

    /// Lists every UID, ascending.
    fn list_uids(&mut self) -> impl Future<Output = Result<Vec<Uid>>> + Send;

    /// Fetches header blocks without marking messages read. UIDs that no
    /// longer exist are absent from the result.
    fn fetch_headers(
        &mut self,
        uids: &[Uid],
    ) -> impl Future<Output = Result<Vec<(Uid, Vec<u8>)>>> + Send;

    /// Fetches one full message without marking it read. `None` if the
    /// message no longer exists.
    fn fetch_message(&mut self, uid: Uid) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Ends the session. Never fails; errors are logged.
    fn logout(self) -> impl Future<Output = ()> + Send;
}

/// IMAP-backed [`MailConnector`].
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: mailingest_imap::Config,
    username: String,
    password: String,
    mailbox: String,
}

impl ImapConnector {
    /// Creates a connector from settings.
    #[must_use]
    pub fn new(settings: &ImapSettings) -> Self {
        Self {
            config: settings.client_config(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            mailbox: settings.mailbox.clone(),
        }
    }
}

impl MailConnector for ImapConnector {
    type Session = ImapSession;

    async fn connect(&self) -> Result<ImapSession> {
        let client = Client::connect(&self.config).await?;
        let client = client.login(&self.username, &self.password).await?;
        let (client, status) = client.examine(&self.mailbox).await?;
        debug!(
            mailbox = %self.mailbox,
            exists = status.exists,
            "mail session opened"
        );
        Ok(ImapSession {
            client,
            uid_validity: status.uid_validity,
        })
    }
}

/// An IMAP session with the polled mailbox opened read-only.
#[derive(Debug)]
pub struct ImapSession {
    client: Client<ImapStream, Selected>,
    uid_validity: Option<UidValidity>,
}

impl MailSession for ImapSession {
    fn uid_validity(&self) -> Option<UidValidity> {
        self.uid_validity
    }

    async fn list_uids(&mut self) -> Result<Vec<Uid>> {
        Ok(self.client.uid_search_all().await?)
    }

    async fn fetch_headers(&mut self, uids: &[Uid]) -> Result<Vec<(Uid, Vec<u8>)>> {
        Ok(self.client.fetch_headers(uids).await?)
    }

    async fn fetch_message(&mut self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let mut messages = self.client.fetch_messages(&[uid]).await?;
        Ok(messages
            .iter()
            .position(|(u, _)| *u == uid)
            .map(|i| messages.swap_remove(i).1))
    }

    async fn logout(self) {
        self.client.logout().await;
    }
}

/// Connects once, counts the mailbox and logs out.
///
/// Used as a startup check; the caller decides whether failure matters.
///
/// # Errors
///
/// Returns the connection or listing error.
pub async fn probe<C: MailConnector>(connector: &C) -> Result<usize> {
    let mut session = connector.connect().await?;
    let listed = session.list_uids().await;
    session.logout().await;
    let count = listed?.len();
    info!(messages = count, "mail server reachable");
    Ok(count)
}
