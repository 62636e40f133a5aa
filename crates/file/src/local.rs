//! Local filesystem line writer implementation

use crate::{Error, LineWriter, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends lines to a local file
///
/// Writes are serialised by a mutex and each line goes out in a single
/// `write_all`, so lines from concurrent workers never interleave.
pub struct AppendFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
    lines: AtomicU64,
}

impl AppendFile {
    /// Open `path` for appending, creating it if it does not exist
    ///
    /// New files are created with mode `0600` on unix.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options.open(&path).await.map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;

        tracing::debug!("Opened {} for appending", path.display());

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            lines: AtomicU64::new(0),
        })
    }

    /// Number of lines written so far
    pub fn lines_written(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LineWriter for AppendFile {
    async fn write_line(&self, line: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(Error::Closed)?;
        file.write_all(&buf).await?;
        self.lines.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut file) = self.file.lock().await.take() else {
            return Ok(());
        };
        file.flush().await?;
        file.sync_all().await?;

        tracing::info!(
            "Closed {} after {} lines",
            self.path.display(),
            self.lines_written()
        );
        Ok(())
    }
}
