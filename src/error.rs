//! Error types for pop3-gateway

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("{0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Syntax: {0}")]
    Syntax(String),

    #[error("no such message")]
    NoSuchMessage,

    #[error("connection is closing")]
    Closing,

    #[error("backend operation panicked")]
    Panicked,

    #[error("Startup error: {0}")]
    Startup(String),
}

impl Error {
    /// Short name of the error class, as reported in generic `-ERR`
    /// replies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Imap(_) => "ImapError",
            Self::Auth(_) => "AuthError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Tls(_) => "TlsError",
            Self::Syntax(_) => "SyntaxError",
            Self::NoSuchMessage => "NotFoundError",
            Self::Closing => "BridgeTerminationError",
            Self::Panicked => "PanicError",
            Self::Startup(_) => "StartupError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
