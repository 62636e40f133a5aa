//! partition-sink library
//!
//! Reads one partition of a Kafka topic and appends every record's payload,
//! one per line, to a local file.
//!
//! # Components
//!
//! - [`consumer`]: the consumer lifecycle, the dispatch queue, the worker pool
//!   and the event loop tying them together
//! - [`shutdown`]: shutdown coordination and signal handling
//! - [`config`]: JSON configuration with command-line overrides
//! - [`logging`]: tracing subscriber setup
//!
//! The Kafka side lives in `partition_sink_kafka` and the output file in
//! `partition_sink_file`.
//!
//! # Example
//!
//! ```no_run
//! use partition_sink::config::Config;
//! use partition_sink::consumer::Consumer;
//! use partition_sink::shutdown::Shutdown;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> partition_sink::Result<()> {
//! let config = Config::from_file("config.json")?;
//! let mut consumer = Consumer::new(&config, Shutdown::new())?;
//! consumer.startup();
//! consumer.load_puller().await?;
//! consumer.load_pusher().await?;
//! consumer.run(CancellationToken::new()).await
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod shutdown;
pub mod testing;

pub use config::Config;
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use shutdown::{Registration, Shutdown};
