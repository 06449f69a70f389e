//! IMAP command serialization and tag generation.

use std::fmt::Write;

use crate::types::Uid;

/// Data items requested by a `UID FETCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItems {
    /// `BODY.PEEK[HEADER]`: header block only, leaves `\Seen` untouched.
    Header,
    /// `BODY.PEEK[]`: the full RFC 5322 message, leaves `\Seen` untouched.
    Full,
}

impl FetchItems {
    /// Returns the wire form of the item list.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Header => "(UID BODY.PEEK[HEADER])",
            Self::Full => "(UID BODY.PEEK[])",
        }
    }
}

/// IMAP commands used by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LOGOUT`
    Logout,
    /// `LOGIN user pass`
    Login {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// `EXAMINE mailbox`
    Examine {
        /// Mailbox name.
        mailbox: String,
    },
    /// `UID SEARCH ALL`
    UidSearchAll,
    /// `UID FETCH set items`
    UidFetch {
        /// UIDs to fetch.
        uids: Vec<Uid>,
        /// Requested data items.
        items: FetchItems,
    },
}

impl Command {
    /// Serializes the command with the given tag, including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut out = String::with_capacity(64);
        out.push_str(tag);
        out.push(' ');

        match self {
            Self::Logout => out.push_str("LOGOUT"),
            Self::Login { username, password } => {
                let _ = write!(out, "LOGIN {} {}", quote(username), quote(password));
            }
            Self::Examine { mailbox } => {
                let _ = write!(out, "EXAMINE {}", quote(mailbox));
            }
            Self::UidSearchAll => out.push_str("UID SEARCH ALL"),
            Self::UidFetch { uids, items } => {
                let _ = write!(out, "UID FETCH {} {}", uid_set(uids), items.as_str());
            }
        }

        out.push_str("\r\n");
        out.into_bytes()
    }

    /// Returns a loggable form of the command with credentials masked.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Login { username, .. } => format!("LOGIN {username} ****"),
            other => {
                let bytes = other.serialize("*");
                String::from_utf8_lossy(&bytes[2..])
                    .trim_end()
                    .to_string()
            }
        }
    }
}

/// Quotes a string per RFC 9051 `quoted`, escaping `"` and `\`.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Formats UIDs as a compact sequence set (`1:3,7,9:10`).
fn uid_set(uids: &[Uid]) -> String {
    let mut values: Vec<u32> = uids.iter().map(|u| u.get()).collect();
    values.sort_unstable();
    values.dedup();

    let mut out = String::new();
    let mut i = 0;
    while i < values.len() {
        let start = values[i];
        let mut end = start;
        while i + 1 < values.len() && values[i + 1] == end + 1 {
            end = values[i + 1];
            i += 1;
        }
        if !out.is_empty() {
            out.push(',');
        }
        if start == end {
            let _ = write!(out, "{start}");
        } else {
            let _ = write!(out, "{start}:{end}");
        }
        i += 1;
    }
    out
}

/// Tag generator for IMAP commands.
///
/// Generates sequential tags in the format "A0001", "A0002", etc. The
/// counter wraps instead of overflowing; a session never lives long enough
/// for a wrapped tag to collide with a pending one.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Generates the next tag.
    pub fn next_tag(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("{}{:04}", self.prefix, self.counter)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
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

    fn uids(values: &[u32]) -> Vec<Uid> {
        values.iter().map(|&v| Uid::new(v).unwrap()).collect()
    }

    #[test]
    fn test_tag_generator_sequence() {
        let mut tags = TagGenerator::default();
        assert_eq!(tags.next_tag(), "A0001");
        assert_eq!(tags.next_tag(), "A0002");
    }

    #[test]
    fn test_serialize_login_quotes_credentials() {
        let cmd = Command::Login {
            username: "user@corp.example".to_string(),
            password: "p\"w\\d".to_string(),
        };
        assert_eq!(
            cmd.serialize("A0001"),
            b"A0001 LOGIN \"user@corp.example\" \"p\\\"w\\\\d\"\r\n"
        );
        assert_eq!(cmd.redacted(), "LOGIN user@corp.example ****");
    }

    #[test]
    fn test_serialize_examine() {
        let cmd = Command::Examine {
            mailbox: "INBOX".to_string(),
        };
        assert_eq!(cmd.serialize("A0002"), b"A0002 EXAMINE \"INBOX\"\r\n");
    }

    #[test]
    fn test_serialize_uid_fetch() {
        let cmd = Command::UidFetch {
            uids: uids(&[9, 1, 2, 3, 7, 10, 3]),
            items: FetchItems::Header,
        };
        assert_eq!(
            cmd.serialize("A0003"),
            b"A0003 UID FETCH 1:3,7,9:10 (UID BODY.PEEK[HEADER])\r\n"
        );
    }

    #[test]
    fn test_redacted_plain_command() {
        assert_eq!(Command::UidSearchAll.redacted(), "UID SEARCH ALL");
    }
}
