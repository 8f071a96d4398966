//! In-process mail backend
//!
//! Holds a mailbox in memory and journals every operation it receives.
//! Useful for demos and for exercising the session algorithm without a
//! network.

use super::{Connector, MailBackend, MessageId, Summary};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::folder::Folder;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One call received by a [`MemoryBackend`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect { host: String, port: u16 },
    Login { user: String },
    Select(String),
    Search,
    FetchSummaries(Vec<MessageId>),
    FetchContent(MessageId),
    AddFlags(Vec<MessageId>, Vec<Flag>),
    Disconnect,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    flags: Vec<Flag>,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, String>,
    messages: Vec<StoredMessage>,
    journal: Vec<Operation>,
    fail_flag_push: bool,
}

/// Shared mailbox state behind every backend a [`MemoryConnector`] hands
/// out.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `user` with `password`. Without any account every login
    /// succeeds.
    #[must_use]
    pub fn with_account(self, user: &str, password: &str) -> Self {
        self.lock()
            .accounts
            .insert(user.to_string(), password.to_string());
        self
    }

    /// Append a message to the mailbox.
    #[must_use]
    pub fn with_message(self, uid: u32, seen: bool, content: &[u8]) -> Self {
        self.lock().messages.push(StoredMessage {
            id: MessageId(uid),
            flags: if seen { vec![Flag::Seen] } else { Vec::new() },
            content: content.to_vec(),
        });
        self
    }

    /// Make every following `add_flags` call fail.
    #[cfg(test)]
    pub(crate) fn fail_flag_push(&self) {
        self.lock().fail_flag_push = true;
    }

    /// Operations received so far.
    #[must_use]
    pub fn journal(&self) -> Vec<Operation> {
        self.lock().journal.clone()
    }

    /// Current flags of a message, if it exists.
    #[must_use]
    pub fn flags(&self, uid: u32) -> Option<Vec<Flag>> {
        self.lock()
            .messages
            .iter()
            .find(|m| m.id == MessageId(uid))
            .map(|m| m.flags.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out [`MemoryBackend`]s sharing one [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    #[must_use]
    pub const fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl Connector for MemoryConnector {
    type Backend = MemoryBackend;

    fn backend(&self, config: &BackendConfig) -> MemoryBackend {
        MemoryBackend {
            store: self.store.clone(),
            host: config.host.clone(),
            port: config.port,
            connected: false,
            authenticated: false,
        }
    }
}

/// A connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryBackend {
    store: MemoryStore,
    host: String,
    port: u16,
    connected: bool,
    authenticated: bool,
}

impl MemoryBackend {
    fn record(&self, op: Operation) -> MutexGuard<'_, State> {
        let mut state = self.store.lock();
        state.journal.push(op);
        state
    }

    fn require_login(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(Error::Imap("not logged in".into()))
        }
    }
}

impl MailBackend for MemoryBackend {
    fn connect(&mut self) -> Result<()> {
        drop(self.record(Operation::Connect {
            host: self.host.clone(),
            port: self.port,
        }));
        self.connected = true;
        Ok(())
    }

    fn login(&mut self, user: &str, password: &str) -> Result<()> {
        if !self.connected {
            return Err(Error::Imap("not connected".into()));
        }
        let state = self.record(Operation::Login {
            user: user.to_string(),
        });
        let accepted = state.accounts.is_empty()
            || state.accounts.get(user).is_some_and(|p| p == password);
        drop(state);
        if !accepted {
            return Err(Error::Imap("Login failed: invalid credentials".into()));
        }
        self.authenticated = true;
        Ok(())
    }

    fn select_folder(&mut self, folder: &Folder) -> Result<u32> {
        self.require_login()?;
        let state = self.record(Operation::Select(folder.to_string()));
        if *folder != Folder::Inbox {
            return Err(Error::Imap(format!("Failed to select {folder}: no such mailbox")));
        }
        u32::try_from(state.messages.len()).map_err(|e| Error::Imap(e.to_string()))
    }

    fn search(&mut self) -> Result<Vec<MessageId>> {
        self.require_login()?;
        let state = self.record(Operation::Search);
        Ok(state.messages.iter().map(|m| m.id).collect())
    }

    fn fetch_summaries(&mut self, ids: &[MessageId]) -> Result<Vec<Summary>> {
        self.require_login()?;
        let state = self.record(Operation::FetchSummaries(ids.to_vec()));
        Ok(state
            .messages
            .iter()
            .filter(|m| ids.contains(&m.id))
            .map(|m| Summary {
                id: m.id,
                flags: m.flags.clone(),
                size: m.content.len() as u64,
            })
            .collect())
    }

    fn fetch_content(&mut self, id: MessageId) -> Result<Vec<u8>> {
        self.require_login()?;
        let state = self.record(Operation::FetchContent(id));
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.content.clone())
            .ok_or_else(|| Error::Imap(format!("No body found for UID {id}")))
    }

    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        self.require_login()?;
        let mut state = self.record(Operation::AddFlags(ids.to_vec(), flags.to_vec()));
        if state.fail_flag_push {
            return Err(Error::Imap("STORE failed".into()));
        }
        for message in state.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            for flag in flags {
                if !message.flags.contains(flag) {
                    message.flags.push(flag.clone());
                }
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            drop(self.record(Operation::Disconnect));
        }
        self.connected = false;
        self.authenticated = false;
        Ok(())
    }
}
