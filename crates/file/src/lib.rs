//! Line sink abstraction for writing records to the local filesystem
//!
//! This crate provides the [`LineWriter`] trait, the single seam through
//! which `partition-sink` workers persist payloads, and [`AppendFile`], its
//! append-mode file implementation.
//!
//! # Concurrency
//!
//! A `LineWriter` is shared by every worker. Implementations must make each
//! `write_line` call land as one complete line: concurrent callers may be
//! ordered arbitrarily but their bytes never interleave.
//!
//! # Example
//!
//! ```ignore
//! use partition_sink_file::{AppendFile, LineWriter};
//!
//! let sink = AppendFile::open("out.log").await?;
//! sink.write_line(b"hello").await?;
//! sink.close().await?;
//! ```

mod local;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use local::AppendFile;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Append-only sink of text lines
#[async_trait]
pub trait LineWriter: Send + Sync {
    /// Append `line` followed by a line break as one uninterrupted write
    async fn write_line(&self, line: &[u8]) -> Result<()>;

    /// Flush and release the underlying handle. Later writes fail with [`Error::Closed`].
    async fn close(&self) -> Result<()>;
}
