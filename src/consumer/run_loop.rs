//! The event loop at the heart of a run.
//!
//! One iteration handles exactly one event: a record to dispatch, a broker
//! error to log, or a reason to stop. Stop reasons are returned rather than
//! acted on; releasing resources is up to the caller.

use super::envelope::Envelope;
use super::queue::{Dispatcher, QueueClosed};
use super::worker::{PoolStats, WorkerFailure};
use crate::shutdown::Registration;
use partition_sink_kafka::Puller;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    StoppingShutdown,
    StoppingCancel,
    StoppingError,
    StoppingExhausted,
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Running => "running",
            RunState::StoppingShutdown => "stopping (shutdown)",
            RunState::StoppingCancel => "stopping (cancelled)",
            RunState::StoppingError => "stopping (error)",
            RunState::StoppingExhausted => "stopping (source exhausted)",
            RunState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why the event loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Stop {
    Shutdown,
    Cancelled,
    Failed(String),
    Exhausted,
}

impl Stop {
    pub(crate) fn state(&self) -> RunState {
        match self {
            Stop::Shutdown => RunState::StoppingShutdown,
            Stop::Cancelled => RunState::StoppingCancel,
            Stop::Failed(_) => RunState::StoppingError,
            Stop::Exhausted => RunState::StoppingExhausted,
        }
    }
}

pub(crate) struct EventLoop<'a> {
    pub puller: &'a mut Puller,
    pub dispatcher: &'a mut Dispatcher,
    pub registration: &'a Registration,
    pub cancel: &'a CancellationToken,
    pub failures: &'a mut mpsc::Receiver<WorkerFailure>,
    pub stats: &'a PoolStats,
}

impl EventLoop<'_> {
    pub(crate) async fn run(self) -> Stop {
        let EventLoop {
            puller,
            dispatcher,
            registration,
            cancel,
            failures,
            stats,
        } = self;
        let ends_only_on_close = puller.ends_only_on_close();
        let (messages, errors) = puller.sources();
        let mut errors_open = true;

        loop {
            if registration.is_notified() {
                return Stop::Shutdown;
            }

            tokio::select! {
                message = messages.recv() => {
                    let Some(record) = message else {
                        if ends_only_on_close {
                            error!("Kafka pump stopped on its own");
                            return Stop::Failed(
                                "Kafka record source stopped unexpectedly".to_string(),
                            );
                        }
                        return Stop::Exhausted;
                    };
                    let offset = record.offset;

                    // Every worker may be busy; stop requests still have to get through.
                    tokio::select! {
                        sent = dispatcher.send(Envelope::new(record)) => match sent {
                            Ok(()) => stats.record_dispatched(),
                            Err(QueueClosed(_)) => {
                                return Stop::Failed("every processor has exited".to_string());
                            }
                        },
                        _ = registration.notified() => {
                            debug!(offset, "Shutdown while dispatching, message not processed");
                            return Stop::Shutdown;
                        }
                        _ = cancel.cancelled() => return Stop::Cancelled,
                        Some(failure) = failures.recv() => return Stop::Failed(failure.to_string()),
                    }
                }
                error = errors.recv(), if errors_open => match error {
                    Some(e) => warn!("Kafka error: {e}"),
                    None => errors_open = false,
                },
                _ = registration.notified() => return Stop::Shutdown,
                _ = cancel.cancelled() => return Stop::Cancelled,
                Some(failure) = failures.recv() => return Stop::Failed(failure.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::queue;
    use crate::shutdown::Shutdown;
    use crate::testing::{channel_puller, record};
    use std::time::Duration;

    #[tokio::test]
    async fn test_stops_on_shutdown_while_every_worker_is_busy() {
        let (feed, mut puller) = channel_puller(4);
        // No worker ever asks for work
        let (mut dispatcher, _receiver) = queue::channel(1);
        let shutdown = Shutdown::new();
        let registration = shutdown.register("test");
        let cancel = CancellationToken::new();
        let (_failures_tx, mut failures) = mpsc::channel(1);
        let stats = PoolStats::default();

        feed.messages.send(record(0, "stuck")).await.unwrap();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let stop = EventLoop {
            puller: &mut puller,
            dispatcher: &mut dispatcher,
            registration: &registration,
            cancel: &cancel,
            failures: &mut failures,
            stats: &stats,
        }
        .run()
        .await;

        assert_eq!(stop, Stop::Shutdown);
        assert_eq!(stats.dispatched(), 0);
    }

    #[tokio::test]
    async fn test_closed_error_source_keeps_running() {
        let (feed, mut puller) = channel_puller(4);
        let (mut dispatcher, _receiver) = queue::channel(1);
        let shutdown = Shutdown::new();
        let registration = shutdown.register("test");
        let cancel = CancellationToken::new();
        let (_failures_tx, mut failures) = mpsc::channel(1);
        let stats = PoolStats::default();

        let _messages = feed.messages;
        drop(feed.errors);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let stop = EventLoop {
            puller: &mut puller,
            dispatcher: &mut dispatcher,
            registration: &registration,
            cancel: &cancel,
            failures: &mut failures,
            stats: &stats,
        }
        .run()
        .await;

        assert_eq!(stop, Stop::Cancelled);
    }

    #[tokio::test]
    async fn test_pump_ending_early_is_a_failure() {
        let (message_tx, message_rx) = mpsc::channel(1);
        let (_error_tx, error_rx) = mpsc::channel(1);
        let pump = tokio::spawn(async move { drop(message_tx) });
        let mut puller = Puller::from_channels(message_rx, error_rx).with_pump(pump);
        let (mut dispatcher, _receiver) = queue::channel(1);
        let shutdown = Shutdown::new();
        let registration = shutdown.register("test");
        let cancel = CancellationToken::new();
        let (_failures_tx, mut failures) = mpsc::channel(1);
        let stats = PoolStats::default();

        let stop = EventLoop {
            puller: &mut puller,
            dispatcher: &mut dispatcher,
            registration: &registration,
            cancel: &cancel,
            failures: &mut failures,
            stats: &stats,
        }
        .run()
        .await;

        assert!(matches!(stop, Stop::Failed(_)));
        puller.close().await;
    }

    #[tokio::test]
    async fn test_fed_source_ending_is_exhausted() {
        let (feed, mut puller) = channel_puller(1);
        drop(feed.messages);
        let (mut dispatcher, _receiver) = queue::channel(1);
        let shutdown = Shutdown::new();
        let registration = shutdown.register("test");
        let cancel = CancellationToken::new();
        let (_failures_tx, mut failures) = mpsc::channel(1);
        let stats = PoolStats::default();

        let stop = EventLoop {
            puller: &mut puller,
            dispatcher: &mut dispatcher,
            registration: &registration,
            cancel: &cancel,
            failures: &mut failures,
            stats: &stats,
        }
        .run()
        .await;

        assert_eq!(stop, Stop::Exhausted);
    }

    #[test]
    fn test_stop_states() {
        assert_eq!(Stop::Shutdown.state(), RunState::StoppingShutdown);
        assert_eq!(Stop::Cancelled.state(), RunState::StoppingCancel);
        assert_eq!(
            Stop::Failed("disk full".to_string()).state(),
            RunState::StoppingError
        );
        assert_eq!(Stop::Exhausted.state(), RunState::StoppingExhausted);
    }
}
