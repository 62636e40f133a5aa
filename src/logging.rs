//! Tracing subscriber setup.
//!
//! The subscriber is installed once by the binary. Library components never
//! touch it: they log through `tracing` macros inside the spans they own.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

const INSTALL_FAILED: &str = "Failed to install tracing subscriber";

/// Where log output ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(String),
    /// The log file could not be opened; carries the reason
    StderrFallback(String),
}

/// Install the global subscriber.
///
/// Logs go to `log_path` (appended, no ANSI colours) when it is non-empty and
/// can be opened, and to stderr otherwise.
pub fn init(log_path: &str) -> anyhow::Result<LogTarget> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());

    let target = if log_path.is_empty() {
        builder
            .with_writer(io::stderr)
            .try_init()
            .map_err(install_failed)?;
        LogTarget::Stderr
    } else {
        match open_log_file(Path::new(log_path)) {
            Ok(file) => {
                builder
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init()
                    .map_err(install_failed)?;
                LogTarget::File(log_path.to_string())
            }
            Err(e) => {
                builder
                    .with_writer(io::stderr)
                    .try_init()
                    .map_err(install_failed)?;
                let reason = format!("Unable to open log file {log_path}: {e}");
                tracing::warn!("{reason}, logging to stderr");
                LogTarget::StderrFallback(reason)
            }
        }
    };

    tracing::info!("Log initialized");
    Ok(target)
}

// `try_init` returns a boxed error, which is not itself an `Error`, so `Context` does not apply
fn install_failed(e: Box<dyn std::error::Error + Send + Sync + 'static>) -> anyhow::Error {
    anyhow::anyhow!("{INSTALL_FAILED}: {e}")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_file_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bridge.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "later").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }

    #[test]
    fn test_install_failed_message() {
        let err = install_failed("dispatcher already been set".into());
        assert!(err.to_string().starts_with(INSTALL_FAILED));
        assert!(err.to_string().contains("already been set"));
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init("");
        let err = init("").unwrap_err();
        assert!(err.to_string().contains(INSTALL_FAILED));
    }

    #[test]
    fn test_open_log_file_bad_directory() {
        assert!(open_log_file(Path::new("/nonexistent/dir/bridge.log")).is_err());
    }
}
