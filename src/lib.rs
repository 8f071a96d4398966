//! POP3 gateway for IMAP mailboxes
//!
//! Serves the unseen messages of an IMAP folder to POP3 clients. A
//! [`Controller`] owns the listener; every connection gets a
//! [`pop3::ProtocolEngine`] driving a set of [`pop3::Hooks`], normally a
//! [`MailboxAdapter`] that opens the user's backend account on PASS.
//!
//! Backend calls are blocking and run on a per-connection
//! [`bridge::Bridge`] worker thread. Deleted messages are marked
//! `\Seen` on the backend at QUIT instead of being expunged.
//!
//! ```no_run
//! use pop3_gateway::{BackendConfig, Controller, FixedAccount, FixedAdapter, ImapConnector, ServerConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> pop3_gateway::Result<()> {
//! let account = Arc::new(FixedAccount(BackendConfig::from_env()?));
//! let connector = Arc::new(ImapConnector);
//! let mut controller = Controller::new(ServerConfig::default(), move || {
//!     FixedAdapter::new(Arc::clone(&account), Arc::clone(&connector))
//! });
//! controller.start()?;
//! // ...
//! controller.stop();
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod bridge;
mod config;
mod controller;
mod error;
mod flag;
mod folder;
pub mod pop3;
pub mod privileges;
pub mod tls;

pub use adapter::{
    Account, AccountDirectory, DirectoryAdapter, FixedAccount, FixedAdapter, MailboxAdapter,
    Resolve,
};
pub use backend::{Connector, ImapConnector, MailBackend, MemoryConnector, MemoryStore};
pub use bridge::Bridge;
pub use config::{BackendConfig, Security, ServerConfig, TlsFiles};
pub use controller::Controller;
pub use error::{Error, Result};
pub use flag::Flag;
pub use folder::Folder;
