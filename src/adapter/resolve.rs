//! Mapping POP3 usernames to backend accounts

use crate::config::{BackendConfig, Security};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a POP3 user's mail lives and which name to log in with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub backend: BackendConfig,
    /// Backend login; the password is always the one given to PASS.
    pub login: String,
}

/// Looks up the backend account for a POP3 username.
#[allow(async_fn_in_trait)]
pub trait Resolve {
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the username is invalid or unknown, or
    /// an error if the account record cannot be read.
    async fn resolve(&self, username: &str) -> Result<Account>;
}

/// Every user lives on the same backend, under the same name.
#[derive(Debug, Clone)]
pub struct FixedAccount(pub BackendConfig);

impl Resolve for FixedAccount {
    async fn resolve(&self, username: &str) -> Result<Account> {
        Ok(Account {
            backend: self.0.clone(),
            login: username.to_string(),
        })
    }
}

/// One JSON file per user in a directory, named after the POP3
/// username:
///
/// ```json
/// {"hostname": "imap.example.org", "port": 993, "use_tls": true}
/// ```
///
/// `use_tls` (alias `ssl`) defaults to true. Optional keys: `username`
/// (backend login, defaults to the POP3 username), `security` (`plain`,
/// `starttls` or `tls`, overrides `use_tls`) and `accept_invalid_certs`.
#[derive(Debug, Clone)]
pub struct AccountDirectory {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    hostname: String,
    port: u16,
    #[serde(default = "default_use_tls", alias = "ssl")]
    use_tls: bool,
    #[serde(default)]
    security: Option<Security>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    accept_invalid_certs: bool,
}

const fn default_use_tls() -> bool {
    true
}

impl AccountDirectory {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Usernames become file names, so anything that could leave the
/// directory or reach a hidden file is refused.
fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && !username.starts_with('.')
        && !username.contains(['/', '\\', '\0'])
}

impl Resolve for AccountDirectory {
    async fn resolve(&self, username: &str) -> Result<Account> {
        if !valid_username(username) {
            return Err(Error::Auth("invalid username".into()));
        }

        let file = self.path.join(username);
        let raw = match tokio::fs::read(&file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No account file {}", file.display());
                return Err(Error::Auth("unknown username".into()));
            }
            Err(e) => return Err(e.into()),
        };

        let record: AccountRecord = serde_json::from_slice(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", file.display())))?;

        let security = record.security.unwrap_or(if record.use_tls {
            Security::Tls
        } else {
            Security::Plain
        });

        Ok(Account {
            backend: BackendConfig {
                host: record.hostname,
                port: record.port,
                security,
                accept_invalid_certs: record.accept_invalid_certs,
            },
            login: record.username.unwrap_or_else(|| username.to_string()),
        })
    }
}
