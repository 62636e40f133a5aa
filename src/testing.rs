//! Test doubles for exercising the consumer without a broker or a disk
//!
//! - [`MemorySink`]: a `LineWriter` that keeps lines in memory, counts closes
//!   and can be told to fail
//! - [`FaultyHandler`] / [`GatedHandler`]: handlers that panic, reject or block
//! - [`channel_puller`]: a `Puller` fed from test code

use crate::consumer::{AppendLine, Envelope, HandlerError, MessageHandler};
use async_trait::async_trait;
use partition_sink_file::LineWriter;
use partition_sink_kafka::{Puller, Record};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Payload that makes [`FaultyHandler`] panic
pub const PANIC_PAYLOAD: &str = "panic";
/// Payload that makes [`FaultyHandler`] reject the message
pub const REJECT_PAYLOAD: &str = "reject";

/// In-memory line sink
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<Vec<u8>>>,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes always fail
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_fail_writes(true);
        sink
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lines written so far, lossily decoded
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    }

    pub fn line_count(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Number of times `close` was called
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LineWriter for MemorySink {
    async fn write_line(&self, line: &[u8]) -> partition_sink_file::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(partition_sink_file::Error::Io(std::io::Error::other(
                "injected write failure",
            )));
        }
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_vec());
        Ok(())
    }

    async fn close(&self) -> partition_sink_file::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Appends like [`AppendLine`], except it panics on [`PANIC_PAYLOAD`] and
/// rejects [`REJECT_PAYLOAD`]
#[derive(Debug, Default)]
pub struct FaultyHandler;

#[async_trait]
impl MessageHandler for FaultyHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        sink: &dyn LineWriter,
    ) -> Result<(), HandlerError> {
        match envelope.payload().as_ref() {
            p if p == PANIC_PAYLOAD.as_bytes() => panic!("handler blew up"),
            p if p == REJECT_PAYLOAD.as_bytes() => {
                Err(HandlerError::Rejected("refusing payload".to_string()))
            }
            _ => AppendLine.handle(envelope, sink).await,
        }
    }
}

/// Appends like [`AppendLine`] once released, keeping workers busy until then
#[derive(Default)]
pub struct GatedHandler {
    started: AtomicUsize,
    release: CancellationToken,
}

impl GatedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let every pending and future message through
    pub fn release(&self) {
        self.release.cancel();
    }

    /// Messages that entered the handler so far
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` messages entered the handler
    pub async fn wait_started(&self, n: usize) {
        while self.started() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl MessageHandler for GatedHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        sink: &dyn LineWriter,
    ) -> Result<(), HandlerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.release.cancelled().await;
        AppendLine.handle(envelope, sink).await
    }
}

/// A record on partition 0 of topic `events`
pub fn record(offset: i64, payload: &str) -> Record {
    Record::new("events", 0, offset, payload.to_string())
}

/// Senders feeding a [`Puller`] built with [`Puller::from_channels`]
pub struct PullerFeed {
    pub messages: mpsc::Sender<Record>,
    pub errors: mpsc::Sender<partition_sink_kafka::Error>,
}

/// A puller fed from test code
pub fn channel_puller(capacity: usize) -> (PullerFeed, Puller) {
    let (messages, message_rx) = mpsc::channel(capacity);
    let (errors, error_rx) = mpsc::channel(capacity);
    (
        PullerFeed { messages, errors },
        Puller::from_channels(message_rx, error_rx),
    )
}
