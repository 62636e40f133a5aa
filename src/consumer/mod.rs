//! Single-partition consumer: pulls records, fans them out to a worker pool
//! and appends each payload to the output file.
//!
//! Lifecycle: [`Consumer::new`] → [`startup`](Consumer::startup) →
//! [`load_puller`](Consumer::load_puller) → [`load_pusher`](Consumer::load_pusher)
//! → [`run`](Consumer::run). `run` consumes the consumer and releases every
//! resource it holds before returning, whatever the outcome.

mod envelope;
mod handler;
mod queue;
mod run_loop;
mod worker;

pub use envelope::{Envelope, MessageContext};
pub use handler::{AppendLine, HandlerError, MessageHandler};
pub use queue::{Dispatcher, QueueClosed, QueueReceiver};
pub use run_loop::RunState;
pub use worker::{PoolStats, WorkerContext, WorkerFailure, WorkerPool};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::shutdown::{Registration, Shutdown};
use futures::FutureExt;
use partition_sink_file::{AppendFile, LineWriter};
use partition_sink_kafka::{Puller, PullerConfig, StartOffset};
use run_loop::{EventLoop, Stop};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

pub struct Consumer {
    name: String,
    topic: String,
    partition: i32,
    offset: StartOffset,
    workers: usize,
    drain_timeout: Duration,
    output_path: PathBuf,
    puller_config: PullerConfig,
    puller: Option<Puller>,
    sink: Option<Arc<dyn LineWriter>>,
    queue: Option<(Dispatcher, QueueReceiver)>,
    handler: Option<Arc<dyn MessageHandler>>,
    shutdown: Shutdown,
    stats: Arc<PoolStats>,
    span: Span,
}

impl Consumer {
    /// Build a consumer from validated configuration.
    ///
    /// The handler defaults to [`AppendLine`]. Nothing is opened yet.
    pub fn new(config: &Config, shutdown: Shutdown) -> Result<Self> {
        config.validate()?;

        let name = config.consumer_name().to_string();
        let span = info_span!(
            "consumer",
            name = %name,
            topic = %config.topic,
            partition = config.partition
        );

        Ok(Self {
            name,
            topic: config.topic.clone(),
            partition: config.partition,
            offset: config.start_offset()?,
            workers: config.max_processors,
            drain_timeout: config.drain_timeout()?,
            output_path: config.output_path(),
            puller_config: config.puller_config()?,
            puller: None,
            sink: None,
            queue: None,
            handler: Some(Arc::new(AppendLine)),
            shutdown,
            stats: Arc::new(PoolStats::default()),
            span,
        })
    }

    /// Settle the worker count and create the dispatch queue.
    pub fn startup(&mut self) {
        let _enter = self.span.enter();
        if self.workers == 0 {
            info!("MaxProcessors is 0, using 1 processor");
            self.workers = 1;
        }
        if self.queue.is_none() {
            self.queue = Some(queue::channel(self.workers));
        }
        info!(
            "Consumer ready: {} processor(s), reading {}/{} from offset {}",
            self.workers, self.topic, self.partition, self.offset
        );
    }

    /// Connect to the brokers and assign the configured partition.
    ///
    /// The metadata and watermark lookups block, so they run on the blocking pool.
    pub async fn load_puller(&mut self) -> Result<()> {
        let config = self.puller_config.clone();
        let span = self.span.clone();
        let puller =
            tokio::task::spawn_blocking(move || span.in_scope(|| Puller::connect(&config)))
                .await
                .map_err(|e| Error::Connection(format!("Kafka connect task failed: {e}")))??;
        self.puller = Some(puller);
        Ok(())
    }

    /// Open the output file for appending.
    pub async fn load_pusher(&mut self) -> Result<()> {
        let sink = AppendFile::open(&self.output_path)
            .instrument(self.span.clone())
            .await?;
        self.sink = Some(Arc::new(sink));
        Ok(())
    }

    /// Use an already built puller
    pub fn with_puller(&mut self, puller: Puller) -> &mut Self {
        self.puller = Some(puller);
        self
    }

    /// Use an already opened sink
    pub fn with_sink(&mut self, sink: Arc<dyn LineWriter>) -> &mut Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the per-message handler. `None` leaves the consumer unable to run.
    pub fn set_handler(&mut self, handler: Option<Arc<dyn MessageHandler>>) -> &mut Self {
        self.handler = handler;
        self
    }

    /// Number of workers `run` will start
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process records until shutdown, cancellation, an unrecoverable error,
    /// or the end of the record source.
    ///
    /// Returns `Ok(())` on shutdown and when the source ends,
    /// [`Error::Cancelled`] when `cancel` fires, and [`Error::Unrecoverable`]
    /// when the sink fails or the loop panics. The puller and the sink are
    /// closed exactly once on every one of those paths.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let span = self.span.clone();
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(mut self, cancel: CancellationToken) -> Result<()> {
        let mut state = RunState::Init;
        debug!("Consumer state: {state}");

        let Some(handler) = self.handler.take() else {
            return Err(Error::Configuration(
                "no message handler configured".to_string(),
            ));
        };
        let (mut puller, sink) = match (self.puller.take(), self.sink.take()) {
            (Some(puller), Some(sink)) => (puller, sink),
            (puller, sink) => {
                let missing = if puller.is_none() { "puller" } else { "sink" };
                release(None, sink, puller).await;
                return Err(Error::Configuration(format!(
                    "{missing} not loaded before run"
                )));
            }
        };
        if self.queue.is_none() {
            self.startup();
        }
        let (mut dispatcher, receiver) = self
            .queue
            .take()
            .unwrap_or_else(|| queue::channel(self.workers));

        let registration = self.shutdown.register(format!("consumer {}", self.name));
        let (failures_tx, mut failures) = mpsc::channel(self.workers.max(1));

        let (stop, pool) = if registration.is_notified() {
            info!("Shutdown already started, not consuming");
            drop(receiver);
            (Ok(Stop::Shutdown), None)
        } else {
            let pool = WorkerPool::start(
                self.workers,
                WorkerContext {
                    queue: receiver,
                    handler,
                    sink: Arc::clone(&sink),
                    failures: failures_tx,
                    stats: Arc::clone(&self.stats),
                },
                &Span::current(),
            );

            state = RunState::Running;
            info!("Consumer state: {state}");

            let event_loop = EventLoop {
                puller: &mut puller,
                dispatcher: &mut dispatcher,
                registration: &registration,
                cancel: &cancel,
                failures: &mut failures,
                stats: &self.stats,
            };
            let stop = AssertUnwindSafe(event_loop.run()).catch_unwind().await;
            (stop, Some(pool))
        };

        let mut result = match stop {
            Ok(stop) => {
                state = stop.state();
                match stop {
                    Stop::Shutdown | Stop::Exhausted => Ok(()),
                    Stop::Cancelled => Err(Error::Cancelled),
                    Stop::Failed(reason) => Err(Error::Unrecoverable(reason)),
                }
            }
            Err(panic) => {
                state = RunState::StoppingError;
                Err(Error::Unrecoverable(format!(
                    "run loop panicked: {}",
                    worker::panic_message(panic.as_ref())
                )))
            }
        };
        info!("Consumer state: {state}");

        dispatcher.close();
        if let Some(pool) = pool {
            let aborted = pool.join(self.drain_timeout).await;
            if aborted > 0 {
                warn!("{aborted} processor(s) aborted with messages in flight");
            }
        }
        // Workers draining after the loop stopped report here
        while let Ok(failure) = failures.try_recv() {
            error!("Processor failed while draining: {failure}");
            if result.is_ok() {
                result = Err(Error::Unrecoverable(failure.to_string()));
            }
        }
        info!(
            "Processed {} messages total ({} dropped, {} dispatched)",
            self.stats.written(),
            self.stats.dropped(),
            self.stats.dispatched()
        );

        release(Some(registration), Some(sink), Some(puller)).await;

        state = RunState::Stopped;
        match &result {
            Ok(()) => info!("Consumer state: {state}"),
            Err(e) if e.is_cancelled() => warn!("Consumer state: {state}: {e}"),
            Err(e) => error!("Consumer state: {state}: {e}"),
        }
        result
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Unregister, close the sink, close the puller. In that order.
async fn release(
    registration: Option<Registration>,
    sink: Option<Arc<dyn LineWriter>>,
    puller: Option<Puller>,
) {
    if let Some(registration) = registration {
        registration.acknowledge();
    }
    if let Some(sink) = sink {
        if let Err(e) = sink.close().await {
            error!("Failed to close output: {e}");
        }
    }
    if let Some(puller) = puller {
        puller.close().await;
    }
}
