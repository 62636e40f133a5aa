use super::envelope::Envelope;
use async_trait::async_trait;
use partition_sink_file::LineWriter;
use thiserror::Error;

/// Why a handler gave up on a message
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The message itself is unusable. The worker logs it, drops it and moves on.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// The sink failed. Writes are never retried, so this stops the consumer.
    #[error("Sink write failed: {0}")]
    Sink(#[from] partition_sink_file::Error),
}

impl HandlerError {
    /// Whether the error must stop the consumer instead of dropping one message
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Sink(_))
    }
}

/// Per-message processing applied by every worker
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &Envelope,
        sink: &dyn LineWriter,
    ) -> Result<(), HandlerError>;
}

/// Writes each payload as one line
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendLine;

#[async_trait]
impl MessageHandler for AppendLine {
    async fn handle(
        &self,
        envelope: &Envelope,
        sink: &dyn LineWriter,
    ) -> Result<(), HandlerError> {
        sink.write_line(envelope.payload()).await?;
        Ok(())
    }
}
