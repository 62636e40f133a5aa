//! Unbuffered handoff between the run loop and the workers.
//!
//! Workers announce readiness by posting a one-shot slot; the dispatcher
//! waits for a slot and fills it. A send therefore completes only once some
//! worker has taken the envelope, and nothing is ever queued in between.

use super::envelope::Envelope;
use tokio::sync::{mpsc, oneshot};

type Slot = oneshot::Sender<Envelope>;

/// Create a queue for `workers` receivers.
pub fn channel(workers: usize) -> (Dispatcher, QueueReceiver) {
    // Each worker has at most one slot outstanding.
    let (ready_tx, ready_rx) = mpsc::channel(workers.max(1));
    (
        Dispatcher { ready: ready_rx },
        QueueReceiver { ready: ready_tx },
    )
}

/// Returned by [`Dispatcher::send`] when every receiver is gone
#[derive(Debug)]
pub struct QueueClosed(pub Envelope);

/// Sending half, owned by the run loop. Dropping it closes the queue.
pub struct Dispatcher {
    ready: mpsc::Receiver<Slot>,
}

impl Dispatcher {
    /// Hand `envelope` to the next ready worker, waiting until one is ready.
    ///
    /// Dropping the returned future before it completes drops the envelope
    /// but never loses a worker's readiness.
    pub async fn send(&mut self, mut envelope: Envelope) -> Result<(), QueueClosed> {
        loop {
            let Some(slot) = self.ready.recv().await else {
                return Err(QueueClosed(envelope));
            };
            match slot.send(envelope) {
                Ok(()) => return Ok(()),
                // The worker stopped waiting; try the next one
                Err(returned) => envelope = returned,
            }
        }
    }

    /// Close the queue. Workers see `None` once they next ask for work.
    pub fn close(self) {}
}

/// Receiving half; clone one per worker.
#[derive(Clone)]
pub struct QueueReceiver {
    ready: mpsc::Sender<Slot>,
}

impl QueueReceiver {
    /// Wait for the next envelope. `None` once the queue is closed.
    pub async fn recv(&self) -> Option<Envelope> {
        let (slot, envelope) = oneshot::channel();
        self.ready.send(slot).await.ok()?;
        envelope.await.ok()
    }
}
