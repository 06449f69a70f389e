//! Core IMAP types.

use std::fmt;
use std::num::NonZeroU32;

/// IMAP command tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(pub String);

impl Tag {
    /// Creates a new tag from a string.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a message.
///
/// UIDs survive expunges of other messages and only change meaning when the
/// mailbox `UIDVALIDITY` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU32);

impl Uid {
    /// Creates a new UID. Returns `None` if the value is 0.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UIDVALIDITY value for a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UidValidity(pub NonZeroU32);

impl UidValidity {
    /// Creates a new UIDVALIDITY. Returns `None` if the value is 0.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for UidValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed.
    No,
    /// Protocol error.
    Bad,
    /// Connection is already authenticated.
    PreAuth,
    /// Server is closing the connection.
    Bye,
}

/// Response code carried in `[...]` after a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `[UIDVALIDITY n]`
    UidValidity(UidValidity),
    /// `[UIDNEXT n]`
    UidNext(Uid),
    /// `[CAPABILITY ...]`
    Capability(Vec<String>),
    /// `[READ-ONLY]`
    ReadOnly,
    /// `[READ-WRITE]`
    ReadWrite,
    /// `[ALERT]`
    Alert,
    /// Any other code, by name.
    Other(String),
}

/// Mailbox status reported by SELECT/EXAMINE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// UIDVALIDITY value.
    pub uid_validity: Option<UidValidity>,
    /// Predicted next UID.
    pub uid_next: Option<Uid>,
    /// True if the mailbox was opened read-only.
    pub read_only: bool,
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

    #[test]
    fn test_uid_new() {
        assert!(Uid::new(0).is_none());
        assert_eq!(Uid::new(123).unwrap().get(), 123);
        assert_eq!(Uid::new(7).unwrap().to_string(), "7");
    }

    #[test]
    fn test_uid_ordering() {
        let mut uids = vec![Uid::new(9).unwrap(), Uid::new(2).unwrap(), Uid::new(5).unwrap()];
        uids.sort();
        let values: Vec<u32> = uids.iter().map(|u| u.get()).collect();
        assert_eq!(values, vec![2, 5, 9]);
    }

    #[test]
    fn test_uid_validity_new() {
        assert!(UidValidity::new(0).is_none());
        assert_eq!(UidValidity::new(42).unwrap().get(), 42);
    }
}
