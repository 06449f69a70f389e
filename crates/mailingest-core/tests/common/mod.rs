//! Shared fixtures: a scripted mailbox and a message builder.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailingest_core::config::{MonitorSettings, RetrySettings};
use mailingest_core::{Error, MailConnector, MailSession, Result};
use mailingest_imap::{Uid, UidValidity};

#[derive(Debug, Default)]
struct Script {
    messages: BTreeMap<u32, Vec<u8>>,
    uid_validity: u32,
    failing_connects: u32,
    failing_header_fetches: u32,
    failing_fetches: HashMap<u32, u32>,
    connects: u32,
    logouts: u32,
    body_fetches: Vec<u32>,
}

/// In-memory mailbox implementing [`MailConnector`].
#[derive(Debug, Clone)]
pub struct ScriptedMailbox {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMailbox {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                uid_validity: 1,
                ..Script::default()
            })),
        }
    }

    pub fn deliver(&self, uid: u32, raw: Vec<u8>) {
        self.script.lock().unwrap().messages.insert(uid, raw);
    }

    pub fn expunge(&self, uid: u32) {
        self.script.lock().unwrap().messages.remove(&uid);
    }

    pub fn set_uid_validity(&self, value: u32) {
        self.script.lock().unwrap().uid_validity = value;
    }

    pub fn fail_connects(&self, n: u32) {
        self.script.lock().unwrap().failing_connects = n;
    }

    pub fn fail_header_fetches(&self, n: u32) {
        self.script.lock().unwrap().failing_header_fetches = n;
    }

    /// The next body fetch of `uid` fails once.
    pub fn fail_fetch_once(&self, uid: u32) {
        self.fail_fetches(uid, 1);
    }

    /// The next `n` body fetches of `uid` fail.
    pub fn fail_fetches(&self, uid: u32, n: u32) {
        self.script.lock().unwrap().failing_fetches.insert(uid, n);
    }

    pub fn connects(&self) -> u32 {
        self.script.lock().unwrap().connects
    }

    pub fn logouts(&self) -> u32 {
        self.script.lock().unwrap().logouts
    }

    pub fn body_fetches(&self) -> Vec<u32> {
        self.script.lock().unwrap().body_fetches.clone()
    }
}

fn transient() -> Error {
    Error::Imap(mailingest_imap::Error::Timeout(Duration::from_secs(1)))
}

impl MailConnector for ScriptedMailbox {
    type Session = ScriptedSession;

    async fn connect(&self) -> Result<ScriptedSession> {
        let mut script = self.script.lock().unwrap();
        if script.failing_connects > 0 {
            script.failing_connects -= 1;
            return Err(transient());
        }
        script.connects += 1;
        Ok(ScriptedSession {
            script: Arc::clone(&self.script),
            uid_validity: UidValidity::new(script.uid_validity),
        })
    }
}

/// Session handed out by [`ScriptedMailbox`].
#[derive(Debug)]
pub struct ScriptedSession {
    script: Arc<Mutex<Script>>,
    uid_validity: Option<UidValidity>,
}

impl MailSession for ScriptedSession {
    fn uid_validity(&self) -> Option<UidValidity> {
        self.uid_validity
    }

    async fn list_uids(&mut self) -> Result<Vec<Uid>> {
        let script = self.script.lock().unwrap();
        Ok(script.messages.keys().filter_map(|&n| Uid::new(n)).collect())
    }

    async fn fetch_headers(&mut self, uids: &[Uid]) -> Result<Vec<(Uid, Vec<u8>)>> {
        let mut script = self.script.lock().unwrap();
        if script.failing_header_fetches > 0 {
            script.failing_header_fetches -= 1;
            return Err(transient());
        }
        Ok(uids
            .iter()
            .filter_map(|&uid| {
                let raw = script.messages.get(&uid.get())?;
                let (header, _) = mailingest_mime::split_header_body(raw);
                Some((uid, header.to_vec()))
            })
            .collect())
    }

    async fn fetch_message(&mut self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let mut script = self.script.lock().unwrap();
        if let Some(left) = script.failing_fetches.get_mut(&uid.get())
            && *left > 0
        {
            *left -= 1;
            return Err(transient());
        }
        script.body_fetches.push(uid.get());
        Ok(script.messages.get(&uid.get()).cloned())
    }

    async fn logout(self) {
        self.script.lock().unwrap().logouts += 1;
    }
}

/// Builds a plain-text message.
pub fn message(to: &str, subject: &str, date: DateTime<Utc>) -> Vec<u8> {
    message_with_date(to, subject, &date.to_rfc2822())
}

/// Builds a plain-text message with a literal `Date` header value.
pub fn message_with_date(to: &str, subject: &str, date: &str) -> Vec<u8> {
    format!(
        "From: Sender <sender@example.com>\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         Date: {date}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Body of {subject}\r\n"
    )
    .into_bytes()
}

/// Monitor settings with a fast retry policy.
pub fn monitor_settings(domain: &str) -> MonitorSettings {
    MonitorSettings {
        target_domain: domain.to_string(),
        first_scan_window: 10,
        retry: RetrySettings {
            max_attempts: 3,
            delay_secs: 1,
        },
        ..MonitorSettings::default()
    }
}
