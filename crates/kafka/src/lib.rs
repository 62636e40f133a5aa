//! Kafka puller for `partition-sink`: reads a single partition of a single
//! topic, starting from an offset chosen once at startup, and never commits.
//!
//! Features:
//!
//! - Partition Assignment: Assigns one partition directly, no consumer-group rebalancing
//! - Startup Checks: Verifies the partition exists and an absolute offset is within the watermarks
//! - Split Sources: Records and broker errors arrive on separate channels

pub mod error;
pub mod offset;

/// Partition puller backed by an rdkafka stream consumer
///
/// A pump task forwards records and errors into two bounded channels, which
/// the owner drains with `tokio::select!`.
pub mod puller;

// Re-export main types for easy access
pub use error::{Error, Result};
pub use offset::StartOffset;
pub use puller::{Puller, PullerConfig, Record, DEFAULT_CHANNEL_CAPACITY};
