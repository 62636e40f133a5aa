use thiserror::Error;

/// Errors surfaced by the consumer lifecycle.
///
/// Broker errors delivered while running and per-message handler failures
/// never show up here: the former are logged, the latter are contained by the
/// worker that hit them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Consumer cancelled")]
    Cancelled,

    #[error("Unrecoverable error: {0}")]
    Unrecoverable(String),
}

impl Error {
    /// True when the run stopped because its cancellation token fired
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<partition_sink_kafka::Error> for Error {
    fn from(e: partition_sink_kafka::Error) -> Self {
        match e {
            partition_sink_kafka::Error::InvalidConfig(msg) => Error::Configuration(msg),
            other => Error::Connection(other.to_string()),
        }
    }
}

impl From<partition_sink_file::Error> for Error {
    fn from(e: partition_sink_file::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
