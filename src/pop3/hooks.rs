//! The contract between the protocol engine and a mailbox provider
//!
//! The engine implements the wire protocol and a neutral default for
//! every command. A [`Hooks`] implementation overrides whichever
//! commands it cares about by returning [`Reply::Respond`]; returning
//! [`Reply::Default`] keeps the engine's behaviour.

use super::session::Session;
use crate::error::{Error, Result};

/// A complete POP3 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A single status line, without the CRLF.
    Status(String),
    /// A status line followed by data lines and the terminating `.`.
    /// Lines are sent dot-stuffed.
    Multi { status: String, lines: Vec<Vec<u8>> },
}

impl Response {
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status(status.into())
    }

    /// `-ERR` followed by the error's message.
    #[must_use]
    pub fn err(error: &Error) -> Self {
        Self::Status(format!("-ERR {error}"))
    }

    /// A multi-line response carrying `body`, split into lines.
    #[must_use]
    pub fn body(status: impl Into<String>, body: &[u8]) -> Self {
        Self::Multi {
            status: status.into(),
            lines: split_lines(body),
        }
    }

    #[must_use]
    pub fn status_line(&self) -> &str {
        match self {
            Self::Status(status) | Self::Multi { status, .. } => status,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status_line().starts_with("+OK")
    }
}

/// Split message content into lines without their terminators.
///
/// Both CRLF and bare LF end a line. A final terminator does not start
/// another, empty line.
#[must_use]
pub fn split_lines(body: &[u8]) -> Vec<Vec<u8>> {
    if body.is_empty() {
        return Vec::new();
    }
    let body = body.strip_suffix(b"\n").unwrap_or(body);
    body.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .collect()
}

/// What a hook wants the engine to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Use the engine's default for this command.
    Default,
    Respond(Response),
}

impl Reply {
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self::Respond(Response::status(status))
    }

    /// The hook's response, or a status line built from `fallback`.
    #[must_use]
    pub fn or_status(self, fallback: &str) -> Response {
        match self {
            Self::Default => Response::status(fallback),
            Self::Respond(response) => response,
        }
    }
}

/// Per-message answer of the LIST and UIDL hooks.
///
/// Numbers past the end of the maildrop are reported with
/// [`Error::NoSuchMessage`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing<T> {
    /// The hook is not implemented.
    Unsupported,
    Entry(T),
    /// The message is marked deleted in this session.
    Deleted,
}

impl<T> Listing<T> {
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Listing<U> {
        match self {
            Self::Unsupported => Listing::Unsupported,
            Self::Entry(value) => Listing::Entry(f(value)),
            Self::Deleted => Listing::Deleted,
        }
    }
}

/// Mailbox operations behind a POP3 session.
///
/// Every method has a neutral default, so an implementation only needs
/// the hooks it serves. Message numbers are 1-based.
///
/// # Errors
///
/// An error returned by any command hook is handed to
/// [`exception`](Hooks::exception) and answered with `-ERR`; the session
/// carries on either way.
#[allow(async_fn_in_trait, clippy::unused_async, clippy::missing_errors_doc)]
pub trait Hooks {
    async fn user(&mut self, _session: &mut Session, _name: &str) -> Result<Reply> {
        Ok(Reply::Default)
    }

    /// Called after USER with the session's username set.
    async fn pass(&mut self, _session: &mut Session, _password: &str) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn apop(&mut self, _session: &mut Session, _arg: Option<&str>) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn quit(&mut self, _session: &mut Session) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn capa(&mut self, _session: &mut Session) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn stat(&mut self, _session: &mut Session) -> Result<Reply> {
        Ok(Reply::Default)
    }

    /// Size in octets of message `n`.
    async fn list(&mut self, _session: &mut Session, _n: usize) -> Result<Listing<u64>> {
        Ok(Listing::Unsupported)
    }

    /// Unique id of message `n`.
    async fn uidl(&mut self, _session: &mut Session, _n: usize) -> Result<Listing<String>> {
        Ok(Listing::Unsupported)
    }

    async fn retr(&mut self, _session: &mut Session, _n: usize) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn dele(&mut self, _session: &mut Session, _n: usize) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn noop(&mut self, _session: &mut Session) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn rset(&mut self, _session: &mut Session) -> Result<Reply> {
        Ok(Reply::Default)
    }

    async fn top(&mut self, _session: &mut Session, _n: usize, _lines: usize) -> Result<Reply> {
        Ok(Reply::Default)
    }

    /// Whether TOP is announced in CAPA.
    fn supports_top(&self) -> bool {
        false
    }

    /// Turn a failed command into a response. [`Reply::Default`] lets
    /// the engine log the error and describe it generically.
    async fn exception(&mut self, _error: &Error) -> Result<Reply> {
        Ok(Reply::Default)
    }

    /// The connection is gone, whether after QUIT or not.
    async fn disconnected(&mut self, _session: &mut Session) {}
}

/// No hooks at all: every command gets its default.
impl Hooks for () {}
