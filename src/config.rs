//! Backend and listener configuration

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Transport security used towards the IMAP backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Cleartext TCP.
    Plain,
    /// Cleartext greeting, then `STARTTLS`.
    StartTls,
    /// TLS from the first byte.
    #[default]
    Tls,
}

impl FromStr for Security {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "none" => Ok(Self::Plain),
            "starttls" => Ok(Self::StartTls),
            "tls" | "ssl" => Ok(Self::Tls),
            other => Err(Error::Config(format!("Unknown security mode: {other}"))),
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "plain",
            Self::StartTls => "starttls",
            Self::Tls => "tls",
        })
    }
}

/// Where and how to reach the IMAP backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    /// Skip certificate verification (self-signed bridges).
    pub accept_invalid_certs: bool,
}

impl BackendConfig {
    /// Load the backend location from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_SECURITY` (`tls`, `starttls` or `plain`; default: `tls`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns an error if `IMAP_PORT` or `IMAP_SECURITY` cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| "993".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            security: env::var("IMAP_SECURITY")
                .map_or(Ok(Security::default()), |v| v.parse())?,
            accept_invalid_certs: env::var("IMAP_ACCEPT_INVALID_CERTS")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        })
    }
}

/// Certificate and key for the POP3 listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    /// Generate a self-signed pair when neither file exists.
    pub generate: bool,
}

/// Listener settings owned by the controller.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_host: String,
    pub port: u16,
    /// Name announced in the greeting; the system host name when unset.
    pub hostname: Option<String>,
    pub tls: Option<TlsFiles>,
    /// Account to switch to once the listener is bound.
    pub drop_privileges: Option<String>,
    pub ready_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "::1".to_string(),
            port: 1100,
            hostname: None,
            tls: None,
            drop_privileges: None,
            ready_timeout: ready_timeout_from_env().unwrap_or(DEFAULT_READY_TIMEOUT),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn new(listen_host: impl Into<String>, port: u16) -> Self {
        Self {
            listen_host: listen_host.into(),
            port,
            ..Self::default()
        }
    }
}

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(1);

/// `POP3_GATEWAY_READY_TIMEOUT`, in (possibly fractional) seconds.
fn ready_timeout_from_env() -> Option<Duration> {
    let raw = env::var("POP3_GATEWAY_READY_TIMEOUT").ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
