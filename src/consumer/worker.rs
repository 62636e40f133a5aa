//! Fixed-size pool of workers draining the dispatch queue.
//!
//! Each worker handles one message at a time. Handler panics and rejected
//! messages are contained per message; a fatal handler error (the sink failed)
//! is reported to the run loop and stops that worker.

use super::handler::{HandlerError, MessageHandler};
use super::queue::QueueReceiver;
use futures::FutureExt;
use partition_sink_file::LineWriter;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Counters shared by the run loop and the workers
#[derive(Debug, Default)]
pub struct PoolStats {
    dispatched: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl PoolStats {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    fn record_written(&self) {
        let count = self.written.fetch_add(1, Ordering::SeqCst) + 1;
        if count % 100 == 0 {
            info!("Processed {count} messages total");
        }
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// A handler error that must stop the consumer
#[derive(Debug)]
pub struct WorkerFailure {
    pub worker: usize,
    pub offset: i64,
    pub error: HandlerError,
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "worker {} failed on offset {}: {}",
            self.worker, self.offset, self.error
        )
    }
}

/// Everything a worker needs, shared by all of them
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: QueueReceiver,
    pub handler: Arc<dyn MessageHandler>,
    pub sink: Arc<dyn LineWriter>,
    pub failures: mpsc::Sender<WorkerFailure>,
    pub stats: Arc<PoolStats>,
}

/// Running workers
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers. Each runs until the queue closes or it hits a fatal error.
    pub fn start(n: usize, context: WorkerContext, parent: &Span) -> Self {
        info!("Starting {n} processor(s)");
        let workers = (0..n)
            .map(|id| {
                let context = context.clone();
                let span = info_span!(parent: parent, "worker", id);
                tokio::spawn(worker_loop(id, context).instrument(span))
            })
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to exit.
    ///
    /// Workers finish the message they are handling before exiting. Those still
    /// busy once `timeout` elapses are aborted; the number aborted is returned.
    pub async fn join(self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;

        for (id, mut handle) in self.workers.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Processor {id} ended abnormally: {e}"),
                Err(_) => {
                    warn!("Processor {id} still busy after {timeout:?}, aborting");
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}

async fn worker_loop(id: usize, context: WorkerContext) {
    info!("Processor started");

    while let Some(envelope) = context.queue.recv().await {
        let outcome = AssertUnwindSafe(context.handler.handle(&envelope, context.sink.as_ref()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => context.stats.record_written(),
            Ok(Err(e)) if e.is_fatal() => {
                error!(
                    offset = envelope.record.offset,
                    "Message processing failed fatally: {e}"
                );
                let failure = WorkerFailure {
                    worker: id,
                    offset: envelope.record.offset,
                    error: e,
                };
                if let Err(e) = context.failures.try_send(failure) {
                    debug!("Failure not reported, run loop already stopping: {e}");
                }
                break;
            }
            Ok(Err(e)) => {
                context.stats.record_dropped();
                warn!(
                    offset = envelope.record.offset,
                    "{} message dropped: {e}",
                    envelope.payload_lossy()
                );
            }
            Err(panic) => {
                context.stats.record_dropped();
                error!(
                    offset = envelope.record.offset,
                    "{} message processing panicked: {}",
                    envelope.payload_lossy(),
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    info!("Processor terminated");
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
