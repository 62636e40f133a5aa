//! Shutdown coordination.
//!
//! [`Shutdown`] is a cloneable handle passed to every component that must
//! react to process termination. Components [`register`](Shutdown::register),
//! wait on [`Registration::notified`], and acknowledge once they have released
//! their resources. The process waits for all acknowledgements (bounded by a
//! timeout) before exiting.
//!
//! Once triggered, a `Shutdown` stays triggered.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    started: CancellationToken,
    triggered: AtomicBool,
    pending: Arc<AtomicUsize>,
    // Cloned into each registration. Taken when waiting so that the receiver
    // sees the channel close once every registration is gone.
    done_tx: Mutex<Option<mpsc::Sender<()>>>,
    done_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                started: CancellationToken::new(),
                triggered: AtomicBool::new(false),
                pending: Arc::new(AtomicUsize::new(0)),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx: tokio::sync::Mutex::new(done_rx),
            }),
        }
    }

    /// Register a component that must acknowledge shutdown
    pub fn register(&self, name: impl Into<String>) -> Registration {
        let name = name.into();
        let done = self
            .inner
            .done_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if done.is_none() {
            warn!("{name} registered after shutdown completion was awaited");
        }
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        debug!("{name} registered for shutdown");

        Registration {
            name,
            started: self.inner.started.clone(),
            pending: Arc::clone(&self.inner.pending),
            _done: done,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.inner.triggered.swap(true, Ordering::SeqCst) {
            info!(
                "Shutdown started, waiting on {} registrant(s)",
                self.pending()
            );
        }
        self.inner.started.cancel();
    }

    /// Whether shutdown has been requested
    pub fn is_started(&self) -> bool {
        self.inner.started.is_cancelled()
    }

    /// Registrations not yet acknowledged or dropped
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Wait until every registration has been acknowledged or dropped.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_acknowledgements(&self, timeout: Duration) -> bool {
        drop(
            self.inner
                .done_tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take(),
        );

        let mut done_rx = self.inner.done_rx.lock().await;
        match tokio::time::timeout(timeout, done_rx.recv()).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "{} registrant(s) did not acknowledge shutdown within {timeout:?}",
                    self.pending()
                );
                false
            }
        }
    }
}

/// A component's membership in a [`Shutdown`].
///
/// Dropping a registration unregisters it, which also counts as acknowledging.
pub struct Registration {
    name: String,
    started: CancellationToken,
    pending: Arc<AtomicUsize>,
    _done: Option<mpsc::Sender<()>>,
}

impl Registration {
    /// Resolves once shutdown has been requested
    pub fn notified(&self) -> WaitForCancellationFuture<'_> {
        self.started.cancelled()
    }

    pub fn is_notified(&self) -> bool {
        self.started.is_cancelled()
    }

    /// Confirm this component has finished shutting down
    pub fn acknowledge(self) {
        debug!("{} acknowledged shutdown", self.name);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Trigger `shutdown` on the first SIGINT/SIGTERM and cancel `cancel` on the second.
pub fn listen_for_signals(shutdown: Shutdown, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("Failed to install signal handler: {e}");
            return;
        }
        info!("Received termination signal");
        shutdown.trigger();

        match wait_for_signal().await {
            Ok(()) => {
                warn!("Received second termination signal, cancelling");
                cancel.cancel();
            }
            Err(e) => error!("Failed to install signal handler: {e}"),
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
