//! Fake IMAP server for integration testing
//!
//! An in-process IMAP server that speaks enough of the protocol to
//! drive the gateway's IMAP backend end-to-end:
//!
//! TCP -> greeting -> STARTTLS -> TLS handshake -> LOGIN -> commands -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and connection dispatch
//! - `handlers/` -- one file per IMAP command
//! - `mailbox` -- test data model (accounts, folders, emails, builder)
//! - `io` -- shared write helpers

mod server;

pub use mailbox::MailboxBuilder;
pub use server::FakeImapServer;
