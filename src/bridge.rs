//! Blocking-to-async bridge
//!
//! A [`Bridge`] owns a blocking object on a dedicated worker thread and
//! exposes it as awaitable calls. Calls are queued FIFO on an unbounded
//! channel; each one carries its own oneshot sender for the result, so
//! completions arrive in submission order without ever blocking the
//! scheduler.
//!
//! ```text
//!   async task                    worker thread
//!   ----------                    -------------
//!   call(op) --- Envelope::Call -->  op(&mut backend)
//!      .await <----- oneshot ------  result / captured panic
//!   terminate() -- Terminate ---->  ack, exit loop
//! ```

use crate::error::{Error, Result};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Job<B> = Box<dyn FnOnce(&mut B) + Send>;

enum Envelope<B> {
    Call(Job<B>),
    Terminate(oneshot::Sender<()>),
}

/// Awaitable handle on an object living on its own thread.
pub struct Bridge<B> {
    tx: mpsc::UnboundedSender<Envelope<B>>,
    /// Set once terminate is requested. Held while sending, so nothing
    /// is ever queued behind the terminate envelope.
    closing: Mutex<bool>,
    worker: Option<JoinHandle<()>>,
}

impl<B> std::fmt::Debug for Bridge<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("closing", &*self.closing())
            .finish_non_exhaustive()
    }
}

impl<B> Bridge<B> {
    fn closing(&self) -> MutexGuard<'_, bool> {
        self.closing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: Send + 'static> Bridge<B> {
    /// Move `backend` onto a new worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn(name: &str, backend: B) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread_name = format!("bridge-{name}");
        let worker = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_loop(&thread_name, backend, rx))?;

        Ok(Self {
            tx,
            closing: Mutex::new(false),
            worker: Some(worker),
        })
    }

    /// Queue `op` and return a future resolving to its result.
    ///
    /// The call is enqueued before this returns, so the order in which
    /// calls are made is the order in which they run. Once
    /// [`terminate`](Self::terminate) has been requested the future
    /// resolves to [`Error::Closing`] without anything being queued.
    ///
    /// # Errors
    ///
    /// The future resolves to the error returned by `op`,
    /// [`Error::Panicked`] if `op` panics, or [`Error::Closing`] if the
    /// bridge is terminating.
    pub fn call<T, F>(&self, op: F) -> impl Future<Output = Result<T>> + use<B, T, F>
    where
        T: Send + 'static,
        F: FnOnce(&mut B) -> Result<T> + Send + 'static,
    {
        let queued = self.enqueue(op);
        async move { queued?.await.map_err(|_| Error::Closing)? }
    }

    /// Check for termination and send under the same lock. A call that
    /// is accepted here always runs before the worker stops.
    fn enqueue<T, F>(&self, op: F) -> Result<oneshot::Receiver<Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce(&mut B) -> Result<T> + Send + 'static,
    {
        let closing = self.closing();
        if *closing {
            return Err(Error::Closing);
        }

        let (reply, rx) = oneshot::channel();
        let job: Job<B> = Box::new(move |backend| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(backend)))
                .unwrap_or_else(|_| Err(Error::Panicked));
            let _ = reply.send(outcome);
        });
        self.tx
            .send(Envelope::Call(job))
            .map_err(|_| Error::Closing)?;
        drop(closing);
        Ok(rx)
    }

    /// Ask the worker to stop after the calls already queued, and wait
    /// for its acknowledgement. Later calls fail with
    /// [`Error::Closing`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closing`] if the worker is already gone.
    pub async fn terminate(&self) -> Result<()> {
        let ack = {
            let mut closing = self.closing();
            if *closing {
                return Ok(());
            }
            *closing = true;
            let (ack, rx) = oneshot::channel();
            self.tx
                .send(Envelope::Terminate(ack))
                .map_err(|_| Error::Closing)?;
            rx
        };
        ack.await.map_err(|_| Error::Closing)
    }

    /// Terminate, then join the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails or the worker thread
    /// panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        let terminated = self.terminate().await;
        if let Some(worker) = self.worker.take() {
            let joined = tokio::task::spawn_blocking(move || worker.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("bridge worker did not exit cleanly");
                return Err(Error::Panicked);
            }
        }
        terminated
    }

    /// Whether [`terminate`](Self::terminate) has been requested.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        *self.closing()
    }
}

fn run_loop<B>(name: &str, mut backend: B, mut rx: mpsc::UnboundedReceiver<Envelope<B>>) {
    let _span = tracing::debug_span!("bridge", worker = name).entered();
    debug!("worker started");

    while let Some(envelope) = rx.blocking_recv() {
        match envelope {
            Envelope::Call(job) => job(&mut backend),
            Envelope::Terminate(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }

    debug!("worker stopped");
}
