//! Blocking mail backends
//!
//! A [`MailBackend`] is the collaborator the gateway drives on behalf of a
//! POP3 client. Every method blocks; backends are only ever called from a
//! [`Bridge`](crate::Bridge) worker thread, which owns the backend object
//! exclusively.

mod connection;
mod imap;
mod memory;

pub use imap::{ImapBackend, ImapConnector};
pub use memory::{MemoryBackend, MemoryConnector, MemoryStore, Operation};

use crate::config::BackendConfig;
use crate::error::Result;
use crate::flag::Flag;
use crate::folder::Folder;
use std::fmt;

/// Backend-assigned message identifier (an IMAP UID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Flags and size of one message, as returned by
/// [`MailBackend::fetch_summaries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub id: MessageId,
    pub flags: Vec<Flag>,
    pub size: u64,
}

impl Summary {
    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.flags.contains(&Flag::Seen)
    }
}

/// A mailbox store reachable through a blocking client.
pub trait MailBackend: Send + 'static {
    /// Open the transport to the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached or TLS fails.
    fn connect(&mut self) -> Result<()>;

    /// Authenticate the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected or the credentials are rejected.
    fn login(&mut self, user: &str, password: &str) -> Result<()>;

    /// Select a mailbox, returning its message count.
    ///
    /// # Errors
    ///
    /// Returns an error if not logged in or the mailbox does not exist.
    fn select_folder(&mut self, folder: &Folder) -> Result<u32>;

    /// All message identifiers in the selected mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if not logged in or the SEARCH fails.
    fn search(&mut self) -> Result<Vec<MessageId>>;

    /// Flags and sizes for the given messages.
    ///
    /// # Errors
    ///
    /// Returns an error if not logged in or the FETCH fails.
    fn fetch_summaries(&mut self, ids: &[MessageId]) -> Result<Vec<Summary>>;

    /// The full RFC 5322 content of one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message has no body or the FETCH fails.
    fn fetch_content(&mut self, id: MessageId) -> Result<Vec<u8>>;

    /// Add `flags` to every message in `ids`, as one batched mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if not logged in or the STORE fails.
    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()>;

    /// Close the connection. Safe to call when not connected.
    ///
    /// # Errors
    ///
    /// Returns an error if LOGOUT fails; the connection is dropped anyway.
    fn disconnect(&mut self) -> Result<()>;
}

/// Builds an unconnected backend for a resolved account.
pub trait Connector: Send + Sync + 'static {
    type Backend: MailBackend;

    fn backend(&self, config: &BackendConfig) -> Self::Backend;
}
