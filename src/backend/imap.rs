//! Blocking IMAP backend on top of async-imap

use super::connection::{self, ImapClient, ImapSession};
use super::{Connector, MailBackend, MessageId, Summary};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::folder::Folder;
use std::future::Future;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

enum Connection {
    Closed,
    Connected(ImapClient),
    Authenticated(ImapSession),
}

/// An IMAP client whose calls block the current thread.
///
/// The backend owns a single-threaded runtime, created on
/// [`connect`](MailBackend::connect), and drives every async-imap call
/// to completion on it. It must therefore never be used from inside
/// another runtime; the gateway only calls it from a bridge worker
/// thread.
pub struct ImapBackend {
    config: BackendConfig,
    runtime: Option<Runtime>,
    connection: Connection,
}

impl std::fmt::Debug for ImapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.connection {
            Connection::Closed => "closed",
            Connection::Connected(_) => "connected",
            Connection::Authenticated(_) => "authenticated",
        };
        f.debug_struct("ImapBackend")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &state)
            .finish()
    }
}

impl ImapBackend {
    #[must_use]
    pub const fn new(config: BackendConfig) -> Self {
        Self {
            config,
            runtime: None,
            connection: Connection::Closed,
        }
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Imap("not connected".into()))?;
        Ok(runtime.block_on(future))
    }

    fn session(&mut self) -> Result<(&Runtime, &mut ImapSession)> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Imap("not connected".into()))?;
        match &mut self.connection {
            Connection::Authenticated(session) => Ok((runtime, session)),
            _ => Err(Error::Imap("not logged in".into())),
        }
    }
}

impl MailBackend for ImapBackend {
    fn connect(&mut self) -> Result<()> {
        if self.runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            self.runtime = Some(runtime);
        }
        let client = self.block_on(connection::open(&self.config))??;
        self.connection = Connection::Connected(client);
        Ok(())
    }

    fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let Connection::Connected(client) =
            std::mem::replace(&mut self.connection, Connection::Closed)
        else {
            return Err(Error::Imap("not connected".into()));
        };
        let session = self.block_on(connection::login(client, user, password))??;
        info!("Logged in to IMAP server as {}", user);
        self.connection = Connection::Authenticated(session);
        Ok(())
    }

    fn select_folder(&mut self, folder: &Folder) -> Result<u32> {
        let (runtime, session) = self.session()?;
        runtime.block_on(connection::select(session, folder.as_str()))
    }

    fn search(&mut self) -> Result<Vec<MessageId>> {
        let (runtime, session) = self.session()?;
        let uids = runtime.block_on(connection::search_all(session))?;
        debug!("Found {} messages", uids.len());
        Ok(uids.into_iter().map(MessageId).collect())
    }

    fn fetch_summaries(&mut self, ids: &[MessageId]) -> Result<Vec<Summary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uids: Vec<u32> = ids.iter().map(|id| id.0).collect();
        let uid_set = connection::uid_set(&uids);

        let (runtime, session) = self.session()?;
        let fetches =
            runtime.block_on(connection::fetch(session, &uid_set, "(FLAGS RFC822.SIZE)"))?;

        let mut summaries = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                warn!("FETCH response without UID, skipping");
                continue;
            };
            summaries.push(Summary {
                id: MessageId(uid),
                flags: fetch.flags().map(Flag::from).collect(),
                size: fetch.size.map_or(0, u64::from),
            });
        }
        Ok(summaries)
    }

    fn fetch_content(&mut self, id: MessageId) -> Result<Vec<u8>> {
        let uid_set = id.to_string();
        let (runtime, session) = self.session()?;
        let fetches = runtime.block_on(connection::fetch(session, &uid_set, "(BODY.PEEK[])"))?;

        fetches
            .iter()
            .find_map(|msg| msg.body().map(<[u8]>::to_vec))
            .ok_or_else(|| Error::Imap(format!("No body found for UID {id}")))
    }

    fn add_flags(&mut self, ids: &[MessageId], flags: &[Flag]) -> Result<()> {
        if ids.is_empty() || flags.is_empty() {
            return Ok(());
        }
        let uids: Vec<u32> = ids.iter().map(|id| id.0).collect();
        let uid_set = connection::uid_set(&uids);
        let query = format!("+FLAGS.SILENT ({})", Flag::join(flags));

        let (runtime, session) = self.session()?;
        runtime.block_on(connection::store(session, &uid_set, &query))?;
        info!("Stored {} on {} messages", query, ids.len());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.connection, Connection::Closed);
        if let Connection::Authenticated(mut session) = previous
            && let Some(runtime) = &self.runtime
            && let Err(e) = runtime.block_on(session.logout())
        {
            debug!("LOGOUT failed: {}", e);
        }
        self.runtime = None;
        Ok(())
    }
}

/// Builds an [`ImapBackend`] per resolved account.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

impl Connector for ImapConnector {
    type Backend = ImapBackend;

    fn backend(&self, config: &BackendConfig) -> ImapBackend {
        ImapBackend::new(config.clone())
    }
}
