//! POP3 maildrops on top of a mail backend
//!
//! [`MailboxAdapter`] implements the POP3 [`Hooks`] for one connection.
//! A successful PASS opens a backend connection on its own [`Bridge`]
//! thread and takes a snapshot of the unseen messages in one folder;
//! that snapshot is the maildrop for the rest of the session. DELE only
//! marks messages locally. At QUIT every deleted message is flagged
//! `\Seen` on the backend in one batch, so it is left out of the next
//! session's maildrop.

mod resolve;

pub use resolve::{Account, AccountDirectory, FixedAccount, Resolve};

use crate::backend::{Connector, ImapConnector, MailBackend, MessageId};
use crate::bridge::Bridge;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::folder::Folder;
use crate::pop3::{Hooks, Listing, Reply, Response, Session, split_lines};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Every user on one fixed backend.
pub type FixedAdapter = MailboxAdapter<FixedAccount>;

/// Per-user backend accounts read from a directory.
pub type DirectoryAdapter = MailboxAdapter<AccountDirectory>;

#[derive(Debug, Clone, Copy)]
struct MessageRecord {
    id: MessageId,
    size: u64,
    deleted: bool,
}

struct OpenMailbox<B> {
    bridge: Bridge<B>,
    messages: Vec<MessageRecord>,
}

impl<B: MailBackend> OpenMailbox<B> {
    /// Count and total size of the messages not marked deleted.
    fn totals(&self) -> (usize, u64) {
        self.messages
            .iter()
            .filter(|m| !m.deleted)
            .fold((0, 0), |(count, octets), m| (count + 1, octets + m.size))
    }

    fn record(&self, n: usize) -> Result<&MessageRecord> {
        n.checked_sub(1)
            .and_then(|i| self.messages.get(i))
            .ok_or(Error::NoSuchMessage)
    }

    /// Log out and stop the worker. Failures are only logged; the
    /// session is over either way.
    async fn close(self) {
        if let Err(e) = self.bridge.call(MailBackend::disconnect).await {
            debug!("Backend disconnect failed: {}", e);
        }
        if let Err(e) = self.bridge.shutdown().await {
            warn!("Bridge shutdown failed: {}", e);
        }
    }
}

/// POP3 hooks serving the unseen messages of one backend folder.
pub struct MailboxAdapter<R, C: Connector = ImapConnector> {
    resolver: Arc<R>,
    connector: Arc<C>,
    folder: Folder,
    open: Option<OpenMailbox<C::Backend>>,
}

impl<R, C: Connector> MailboxAdapter<R, C> {
    /// A fresh adapter for one connection. The resolver and connector
    /// are shared by every connection of a server.
    #[must_use]
    pub const fn new(resolver: Arc<R>, connector: Arc<C>) -> Self {
        Self {
            resolver,
            connector,
            folder: Folder::Inbox,
            open: None,
        }
    }

    /// Serve `folder` instead of the INBOX.
    #[must_use]
    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.folder = folder;
        self
    }

    fn mailbox(&self) -> Result<&OpenMailbox<C::Backend>> {
        self.open
            .as_ref()
            .ok_or_else(|| Error::Imap("no mailbox open".into()))
    }

    fn mailbox_mut(&mut self) -> Result<&mut OpenMailbox<C::Backend>> {
        self.open
            .as_mut()
            .ok_or_else(|| Error::Imap("no mailbox open".into()))
    }
}

impl<R: Resolve, C: Connector> MailboxAdapter<R, C> {
    async fn open_mailbox(&self, username: &str, password: &str) -> Result<OpenMailbox<C::Backend>> {
        let account = self.resolver.resolve(username).await?;
        debug!(
            "Resolved {:?} to {}:{} as {:?}",
            username, account.backend.host, account.backend.port, account.login
        );

        let bridge = Bridge::spawn("backend", self.connector.backend(&account.backend))?;
        let inventory = take_inventory(
            &bridge,
            account.login,
            password.to_string(),
            self.folder.clone(),
        )
        .await;

        match inventory {
            Ok(messages) => Ok(OpenMailbox { bridge, messages }),
            Err(e) => {
                OpenMailbox {
                    bridge,
                    messages: Vec::new(),
                }
                .close()
                .await;
                Err(e)
            }
        }
    }
}

/// Log in, then list the unseen messages of `folder` in UID order.
async fn take_inventory<B: MailBackend>(
    bridge: &Bridge<B>,
    login: String,
    password: String,
    folder: Folder,
) -> Result<Vec<MessageRecord>> {
    bridge.call(MailBackend::connect).await?;
    bridge
        .call(move |backend| backend.login(&login, &password))
        .await?;

    let exists = bridge
        .call(move |backend| backend.select_folder(&folder))
        .await?;
    if exists == 0 {
        return Ok(Vec::new());
    }

    let ids = bridge.call(MailBackend::search).await?;
    let mut summaries = bridge
        .call(move |backend| backend.fetch_summaries(&ids))
        .await?;
    summaries.retain(|s| !s.is_seen());
    summaries.sort_by_key(|s| s.id);

    Ok(summaries
        .into_iter()
        .map(|s| MessageRecord {
            id: s.id,
            size: s.size,
            deleted: false,
        })
        .collect())
}

/// Header block, the blank separator, then the first `lines` body lines.
fn top_lines(content: &[u8], lines: usize) -> Vec<Vec<u8>> {
    let all = split_lines(content);
    let body_start = all
        .iter()
        .position(Vec::is_empty)
        .map_or(all.len(), |blank| blank + 1);
    all.into_iter().take(body_start.saturating_add(lines)).collect()
}

impl<R: Resolve, C: Connector> Hooks for MailboxAdapter<R, C> {
    async fn pass(&mut self, session: &mut Session, password: &str) -> Result<Reply> {
        let Some(username) = session.username().map(str::to_string) else {
            return Ok(Reply::status("-ERR must supply username first"));
        };
        if let Some(previous) = self.open.take() {
            previous.close().await;
        }

        match self.open_mailbox(&username, password).await {
            Ok(open) => {
                let (count, octets) = open.totals();
                info!("Opened {} for {:?}: {} messages", self.folder, username, count);
                self.open = Some(open);
                Ok(Reply::status(format!(
                    "+OK maildrop has {count} messages ({octets} octets)"
                )))
            }
            Err(e) => {
                session.clear_username();
                Ok(Reply::Respond(Response::err(&e)))
            }
        }
    }

    async fn quit(&mut self, _session: &mut Session) -> Result<Reply> {
        let Some(open) = self.open.take() else {
            return Ok(Reply::Default);
        };

        let deleted: Vec<MessageId> = open
            .messages
            .iter()
            .filter(|m| m.deleted)
            .map(|m| m.id)
            .collect();
        let pushed = if deleted.is_empty() {
            Ok(())
        } else {
            let count = deleted.len();
            let result = open
                .bridge
                .call(move |backend| backend.add_flags(&deleted, &[Flag::Seen]))
                .await;
            if result.is_ok() {
                info!("Marked {} messages seen", count);
            }
            result
        };
        open.close().await;

        Ok(match pushed {
            Ok(()) => Reply::Default,
            Err(e) => {
                warn!("Flag push failed: {}", e);
                Reply::status(format!("-ERR some deleted messages not removed: {e}"))
            }
        })
    }

    async fn stat(&mut self, _session: &mut Session) -> Result<Reply> {
        let (count, octets) = self.mailbox()?.totals();
        Ok(Reply::status(format!("+OK {count} {octets}")))
    }

    async fn list(&mut self, _session: &mut Session, n: usize) -> Result<Listing<u64>> {
        let record = self.mailbox()?.record(n)?;
        Ok(if record.deleted {
            Listing::Deleted
        } else {
            Listing::Entry(record.size)
        })
    }

    async fn uidl(&mut self, _session: &mut Session, n: usize) -> Result<Listing<String>> {
        let record = self.mailbox()?.record(n)?;
        Ok(if record.deleted {
            Listing::Deleted
        } else {
            Listing::Entry(record.id.to_string())
        })
    }

    async fn retr(&mut self, _session: &mut Session, n: usize) -> Result<Reply> {
        let mailbox = self.mailbox()?;
        let record = *mailbox.record(n)?;
        if record.deleted {
            return Ok(Reply::status("-ERR message deleted"));
        }
        let content = mailbox
            .bridge
            .call(move |backend| backend.fetch_content(record.id))
            .await?;
        Ok(Reply::Respond(Response::body(
            format!("+OK {} octets", content.len()),
            &content,
        )))
    }

    async fn top(&mut self, _session: &mut Session, n: usize, lines: usize) -> Result<Reply> {
        let mailbox = self.mailbox()?;
        let record = *mailbox.record(n)?;
        if record.deleted {
            return Ok(Reply::status("-ERR message deleted"));
        }
        let content = mailbox
            .bridge
            .call(move |backend| backend.fetch_content(record.id))
            .await?;
        Ok(Reply::Respond(Response::Multi {
            status: "+OK top of message follows".to_string(),
            lines: top_lines(&content, lines),
        }))
    }

    async fn dele(&mut self, _session: &mut Session, n: usize) -> Result<Reply> {
        let mailbox = self.mailbox_mut()?;
        let index = n.checked_sub(1).ok_or(Error::NoSuchMessage)?;
        let record = mailbox
            .messages
            .get_mut(index)
            .ok_or(Error::NoSuchMessage)?;
        if record.deleted {
            return Ok(Reply::status("-ERR message already deleted"));
        }
        record.deleted = true;
        Ok(Reply::Default)
    }

    async fn rset(&mut self, _session: &mut Session) -> Result<Reply> {
        for record in &mut self.mailbox_mut()?.messages {
            record.deleted = false;
        }
        Ok(Reply::Default)
    }

    fn supports_top(&self) -> bool {
        true
    }

    async fn disconnected(&mut self, _session: &mut Session) {
        if let Some(open) = self.open.take() {
            debug!("Client went away, discarding {} messages", open.messages.len());
            open.close().await;
        }
    }
}
