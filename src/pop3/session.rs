//! Per-connection POP3 session state

/// RFC 1939 session state.
///
/// UPDATE is not modelled: QUIT in TRANSACTION commits through the hooks
/// and the connection ends right after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Authorization,
    Transaction,
}

/// Identity and progress of one client connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Remote address, for logging.
    pub peer: String,
    state: State,
    username: Option<String>,
    password: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            state: State::Authorization,
            username: None,
            password: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Record the mailbox name. Returns `false`, leaving the session
    /// untouched, if one was already supplied.
    pub fn set_username(&mut self, name: impl Into<String>) -> bool {
        if self.username.is_some() {
            return false;
        }
        self.username = Some(name.into());
        true
    }

    /// Forget the mailbox name after a rejected PASS so the client can
    /// start over with USER.
    pub fn clear_username(&mut self) {
        if self.state == State::Authorization {
            self.username = None;
        }
    }

    /// Enter TRANSACTION. Only the first call has any effect.
    pub(crate) fn authenticate(&mut self, password: &str) -> bool {
        if self.state != State::Authorization {
            return false;
        }
        self.password = Some(password.to_string());
        self.state = State::Transaction;
        true
    }
}
