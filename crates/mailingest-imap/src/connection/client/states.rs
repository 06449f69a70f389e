//! Session state markers.

/// Greeting received; only LOGIN and LOGOUT are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Logged in; a mailbox may be selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// A mailbox is open.
#[derive(Debug, Clone)]
pub struct Selected {
    pub(crate) mailbox: String,
}

impl Selected {
    /// Returns the open mailbox's name.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }
}
