//! Listener lifecycle
//!
//! The [`Controller`] runs the POP3 listener on a dedicated thread with a
//! single-threaded runtime and a `LocalSet`, so the engines and their
//! hooks never need to be `Send`. [`Controller::start`] and
//! [`Controller::stop`] are plain blocking calls for embedding code.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::pop3::{Hooks, ProtocolEngine};
use crate::{privileges, tls};
use std::net::SocketAddr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinSet, LocalSet};
use tokio_rustls::TlsAcceptor;
use tracing::{Instrument, debug, error, info, info_span, warn};

struct Running {
    thread: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

/// Owns the listener thread and builds one set of hooks per accepted
/// connection with `factory`.
pub struct Controller<F> {
    config: ServerConfig,
    factory: Arc<F>,
    local_addr: Arc<OnceLock<SocketAddr>>,
    running: Option<Running>,
}

/// Everything the listener thread needs.
struct Listener<F> {
    config: ServerConfig,
    hostname: String,
    acceptor: Option<TlsAcceptor>,
    factory: Arc<F>,
    local_addr: Arc<OnceLock<SocketAddr>>,
}

impl<F, H> Controller<F>
where
    F: Fn() -> H + Send + Sync + 'static,
    H: Hooks + 'static,
{
    /// A stopped controller serving connections with hooks from `factory`.
    #[must_use]
    pub fn new(config: ServerConfig, factory: F) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            local_addr: Arc::new(OnceLock::new()),
            running: None,
        }
    }

    /// Load TLS material, spawn the listener thread and wait (up to the
    /// configured ready timeout) until it is accepting connections.
    ///
    /// Bind and privilege-drop failures reported within the timeout are
    /// returned here.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS material cannot be loaded or
    /// generated, the listener thread cannot be spawned, or the listener
    /// reports a bind or privilege-drop failure.
    ///
    /// # Panics
    ///
    /// Panics if the controller is already running.
    pub fn start(&mut self) -> Result<()> {
        assert!(self.running.is_none(), "POP3 gateway already running");

        let acceptor = self.config.tls.as_ref().map(tls::acceptor).transpose()?;
        let hostname = self
            .config
            .hostname
            .clone()
            .unwrap_or_else(privileges::system_hostname);

        self.local_addr = Arc::new(OnceLock::new());
        let listener = Listener {
            config: self.config.clone(),
            hostname,
            acceptor,
            factory: Arc::clone(&self.factory),
            local_addr: Arc::clone(&self.local_addr),
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let thread = std::thread::Builder::new()
            .name("pop3-gateway".into())
            .spawn(move || listener.run(ready_tx, stop_rx))?;

        match ready_rx.recv_timeout(self.config.ready_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "POP3 listener not ready after {:?}, continuing",
                    self.config.ready_timeout
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                return Err(Error::Startup("listener thread exited".into()));
            }
        }

        self.running = Some(Running {
            thread,
            stop: stop_tx,
        });
        Ok(())
    }
}

impl<F> Controller<F> {
    /// Stop accepting, abort every open connection and join the listener
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if the controller is not running.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            panic!("POP3 gateway not running");
        };
        let _ = running.stop.send(());
        if running.thread.join().is_err() {
            error!("POP3 listener thread panicked");
        }
        info!("POP3 server stopped");
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The bound address, once the listener is up. Useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

impl<F> Drop for Controller<F> {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.stop();
        }
    }
}

impl<F, H> Listener<F>
where
    F: Fn() -> H + Send + Sync + 'static,
    H: Hooks + 'static,
{
    fn run(self, ready: mpsc::Sender<Result<()>>, stop: oneshot::Receiver<()>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = ready.send(Err(e.into()));
                return;
            }
        };
        LocalSet::new().block_on(&runtime, self.serve(ready, stop));
    }

    async fn serve(self, ready: mpsc::Sender<Result<()>>, mut stop: oneshot::Receiver<()>) {
        let host = self.config.listen_host.as_str();
        let port = self.config.port;
        let listener = match TcpListener::bind((host, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Cannot listen on {}:{}: {}", host, port, e);
                let _ = ready.send(Err(Error::Startup(format!(
                    "Cannot listen on {host}:{port}: {e}"
                ))));
                return;
            }
        };

        if let Some(user) = &self.config.drop_privileges
            && let Err(e) = privileges::drop_privileges(user)
        {
            error!("{}", e);
            let _ = ready.send(Err(e));
            return;
        }

        match listener.local_addr() {
            Ok(addr) => {
                let _ = self.local_addr.set(addr);
                info!("POP3 server listening on {}", addr);
            }
            Err(e) => warn!("Cannot read listener address: {}", e),
        }
        let _ = ready.send(Ok(()));

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hooks = (self.factory)();
                        let span = info_span!("pop3", %peer);
                        connections.spawn_local(
                            serve_connection(
                                stream,
                                peer,
                                hooks,
                                self.hostname.clone(),
                                self.acceptor.clone(),
                            )
                            .instrument(span),
                        );
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished
                        && e.is_panic()
                    {
                        error!("Connection task panicked");
                    }
                }
            }
        }

        info!("POP3 server stopping");
        drop(listener);
        connections.shutdown().await;
    }
}

async fn serve_connection<H: Hooks>(
    stream: TcpStream,
    peer: SocketAddr,
    hooks: H,
    hostname: String,
    acceptor: Option<TlsAcceptor>,
) {
    let peer = peer.to_string();
    let served = match acceptor {
        None => ProtocolEngine::new(stream, hooks, peer, hostname).run().await,
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => ProtocolEngine::new(tls, hooks, peer, hostname).run().await,
            Err(e) => {
                warn!("TLS handshake failed: {}", e);
                return;
            }
        },
    };
    if let Err(e) = served {
        debug!("Connection ended: {}", e);
    }
}
