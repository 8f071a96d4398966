//! Process identity: privilege drop and the local host name

use crate::error::{Error, Result};
use nix::unistd::{self, User};
use tracing::info;

/// Switch the whole process to `username`'s UID and GID.
///
/// Nothing happens when the process already runs as that user.
///
/// # Errors
///
/// Returns [`Error::Startup`] if the user does not exist or the
/// group list, GID or UID cannot be changed.
pub fn drop_privileges(username: &str) -> Result<()> {
    let user = User::from_name(username)
        .map_err(|e| Error::Startup(format!("Unable to look up user '{username}': {e}")))?
        .ok_or_else(|| Error::Startup(format!("User '{username}' does not exist")))?;

    if user.uid == unistd::getuid() {
        return Ok(());
    }

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    unistd::setgroups(&[user.gid]).map_err(|e| {
        Error::Startup(format!("Failed to set groups for UID {}: {e}", user.uid))
    })?;

    unistd::setgid(user.gid)
        .and_then(|()| unistd::setuid(user.uid))
        .map_err(|e| {
            Error::Startup(format!(
                "Failed to set UID:GID to {}:{}: {e}",
                user.uid, user.gid
            ))
        })?;

    info!("Dropped privileges to {} ({}:{})", username, user.uid, user.gid);
    Ok(())
}

/// The host name announced in the POP3 greeting.
#[must_use]
pub fn system_hostname() -> String {
    unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
