//! Per-connection POP3 state machine
//!
//! ```text
//!   greeting -> AUTHORIZATION --USER/PASS--> TRANSACTION --QUIT--> closed
//! ```
//!
//! The engine owns the transport, the [`Session`] and the hooks. It reads
//! one line at a time, looks the command up in [`COMMANDS`](super::COMMANDS),
//! checks the session state, runs the handler and writes exactly one
//! response. A failing command never ends the connection; only transport
//! errors, EOF and QUIT do.

use super::command::{self, Command};
use super::hooks::{Hooks, Listing, Reply, Response};
use super::io::{Line, Transport};
use super::session::Session;
use crate::error::{Error, Result};
use std::fmt::Write as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Server name announced in the greeting.
pub const IDENT: &str = "pop3-gateway";

const CANNOT_DESCRIBE: &str = "-ERR Error: Cannot describe error";

struct Outcome {
    response: Response,
    close: bool,
}

impl Outcome {
    const fn reply(response: Response) -> Self {
        Self {
            response,
            close: false,
        }
    }

    fn status(status: impl Into<String>) -> Self {
        Self::reply(Response::status(status))
    }
}

/// One POP3 conversation over `S`, answered by `H`.
pub struct ProtocolEngine<S, H> {
    transport: Transport<S>,
    session: Session,
    hooks: H,
    hostname: String,
}

impl<S, H> ProtocolEngine<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Hooks,
{
    #[must_use]
    pub fn new(stream: S, hooks: H, peer: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            transport: Transport::new(stream),
            session: Session::new(peer),
            hooks,
            hostname: hostname.into(),
        }
    }

    /// Greet the client and serve commands until QUIT, EOF or a
    /// transport error. The `disconnected` hook runs in every case.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from or writing to the client fails.
    pub async fn run(mut self) -> Result<()> {
        debug!("Connection opened");
        let served = self.serve().await;
        self.hooks.disconnected(&mut self.session).await;
        debug!("Connection closed");
        served
    }

    async fn serve(&mut self) -> Result<()> {
        let greeting = format!("+OK {} {}", self.hostname, IDENT);
        self.transport.push(&greeting).await?;

        loop {
            let raw = match self.transport.read_line().await? {
                Line::Eof => return Ok(()),
                Line::TooLong => {
                    self.transport.push("-ERR Error: line too long").await?;
                    continue;
                }
                Line::Data(raw) => raw,
            };

            let outcome = match std::str::from_utf8(&raw) {
                Ok(line) if !line.is_empty() => self.dispatch(line).await,
                _ => Outcome::status("-ERR Error: bad syntax"),
            };

            self.transport.send(&outcome.response).await?;
            if outcome.close {
                self.transport.shutdown().await.ok();
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> Outcome {
        let (name, arg) = command::split(line);
        debug!("C: {}", name);

        let Some(descriptor) = command::lookup(name) else {
            return Outcome::status(format!("-ERR command \"{name}\" not recognized"));
        };
        if descriptor
            .state
            .is_some_and(|state| state != self.session.state())
        {
            return Outcome::status(format!("-ERR wrong state for \"{name}\""));
        }

        match self.execute(descriptor.command, arg).await {
            Ok(outcome) => outcome,
            Err(e @ (Error::Syntax(_) | Error::NoSuchMessage)) => Outcome::reply(Response::err(&e)),
            Err(e) => Outcome::reply(self.describe(e).await),
        }
    }

    async fn execute(&mut self, command: Command, arg: Option<&str>) -> Result<Outcome> {
        match command {
            Command::Capa => self.capa(arg).await,
            Command::User => self.user(arg).await,
            Command::Pass => self.pass(arg).await,
            Command::Apop => {
                let reply = self.hooks.apop(&mut self.session, arg).await?;
                Ok(Outcome::reply(reply.or_status("-ERR APOP not implemented")))
            }
            Command::Quit => self.quit(arg).await,
            Command::Stat => {
                no_argument(arg, "STAT")?;
                let reply = self.hooks.stat(&mut self.session).await?;
                Ok(Outcome::reply(reply.or_status("+OK 0 0")))
            }
            Command::List => self.scan(Command::List, arg).await,
            Command::Uidl => self.scan(Command::Uidl, arg).await,
            Command::Retr => {
                let n = command::parse_message_number(arg, "RETR <n>")?;
                let reply = self.hooks.retr(&mut self.session, n).await?;
                Ok(Outcome::reply(reply.or_status("-ERR no such message")))
            }
            Command::Dele => {
                let n = command::parse_message_number(arg, "DELE <n>")?;
                let reply = self.hooks.dele(&mut self.session, n).await?;
                Ok(Outcome::reply(reply.or_status("+OK deleted")))
            }
            Command::Noop => {
                no_argument(arg, "NOOP")?;
                let reply = self.hooks.noop(&mut self.session).await?;
                Ok(Outcome::reply(reply.or_status("+OK")))
            }
            Command::Rset => {
                no_argument(arg, "RSET")?;
                let reply = self.hooks.rset(&mut self.session).await?;
                Ok(Outcome::reply(reply.or_status("+OK")))
            }
            Command::Top => {
                let (n, lines) = command::parse_top_args(arg)?;
                let reply = self.hooks.top(&mut self.session, n, lines).await?;
                Ok(Outcome::reply(reply.or_status("-ERR TOP not implemented")))
            }
        }
    }

    async fn capa(&mut self, arg: Option<&str>) -> Result<Outcome> {
        no_argument(arg, "CAPA")?;
        let response = match self.hooks.capa(&mut self.session).await? {
            Reply::Respond(response) => response,
            Reply::Default => {
                let mut lines = vec![b"USER".to_vec(), b"UIDL".to_vec()];
                if self.hooks.supports_top() {
                    lines.push(b"TOP".to_vec());
                }
                Response::Multi {
                    status: "+OK Capability list follows".to_string(),
                    lines,
                }
            }
        };
        Ok(Outcome::reply(response))
    }

    async fn user(&mut self, arg: Option<&str>) -> Result<Outcome> {
        let name = arg.ok_or_else(|| Error::Syntax("USER <username>".into()))?;
        if self.session.username().is_some() {
            return Ok(Outcome::status("-ERR already supplied username"));
        }
        let response = match self.hooks.user(&mut self.session, name).await? {
            Reply::Respond(response) => response,
            Reply::Default => {
                self.session.set_username(name);
                Response::status("+OK name is a valid mailbox")
            }
        };
        Ok(Outcome::reply(response))
    }

    async fn pass(&mut self, arg: Option<&str>) -> Result<Outcome> {
        let password = arg.ok_or_else(|| Error::Syntax("PASS <password>".into()))?;
        let Some(username) = self.session.username().map(str::to_string) else {
            return Ok(Outcome::status("-ERR must supply username first"));
        };

        let response = self
            .hooks
            .pass(&mut self.session, password)
            .await?
            .or_status("+OK");
        if response.is_ok() {
            self.session.authenticate(password);
            info!("Logged in as {:?}", username);
        } else {
            warn!(
                "Login attempt as {:?} failed: {:?}",
                username,
                response.status_line()
            );
        }
        Ok(Outcome::reply(response))
    }

    async fn quit(&mut self, arg: Option<&str>) -> Result<Outcome> {
        no_argument(arg, "QUIT")?;
        let response = match self.hooks.quit(&mut self.session).await {
            Ok(reply) => reply.or_status("+OK Bye"),
            Err(e) => self.describe(e).await,
        };
        Ok(Outcome {
            response,
            close: true,
        })
    }

    /// LIST and UIDL, with or without a message number.
    async fn scan(&mut self, command: Command, arg: Option<&str>) -> Result<Outcome> {
        let (title, usage) = match command {
            Command::Uidl => ("+OK unique-id listing follows", "UIDL [n]"),
            _ => ("+OK scan listing follows", "LIST [n]"),
        };

        if arg.is_some() {
            let n = command::parse_message_number(arg, usage)?;
            return Ok(match self.listing(command, n).await? {
                Listing::Unsupported => Outcome::status("-ERR not implemented"),
                Listing::Entry(value) => Outcome::status(format!("+OK {n} {value}")),
                Listing::Deleted => Outcome::status("-ERR no such message"),
            });
        }

        let mut lines = Vec::new();
        for n in 1.. {
            match self.listing(command, n).await {
                Ok(Listing::Unsupported) => return Ok(Outcome::status("-ERR not implemented")),
                Ok(Listing::Entry(value)) => lines.push(format!("{n} {value}").into_bytes()),
                Ok(Listing::Deleted) => {}
                Err(Error::NoSuchMessage) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Outcome::reply(Response::Multi {
            status: title.to_string(),
            lines,
        }))
    }

    async fn listing(&mut self, command: Command, n: usize) -> Result<Listing<String>> {
        Ok(match command {
            Command::Uidl => self.hooks.uidl(&mut self.session, n).await?,
            _ => self
                .hooks
                .list(&mut self.session, n)
                .await?
                .map(|size| size.to_string()),
        })
    }

    /// Response for a failed command: the exception hook's, or a generic
    /// description of the error.
    async fn describe(&mut self, failure: Error) -> Response {
        match self.hooks.exception(&failure).await {
            Ok(Reply::Respond(response)) => response,
            Ok(Reply::Default) => {
                error!("POP3 session exception: {}", failure);
                generic_error(&failure)
            }
            Err(secondary) => {
                error!("Exception hook failed on {}: {}", failure, secondary);
                generic_error(&secondary)
            }
        }
    }
}

fn no_argument(arg: Option<&str>, name: &str) -> Result<()> {
    match arg {
        None => Ok(()),
        Some(_) => Err(Error::Syntax(name.to_string())),
    }
}

fn generic_error(failure: &Error) -> Response {
    let mut status = String::new();
    match write!(status, "-ERR Error: ({}) {}", failure.kind(), failure) {
        Ok(()) => Response::Status(status),
        Err(_) => Response::status(CANNOT_DESCRIBE),
    }
}
