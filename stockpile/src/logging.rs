//! Logging setup for applications embedding the crate.
//!
//! - Writes to `<log_dir>/<log_file>` (cleared on start)
//! - Optionally mirrors output to stdout
//! - Filtered by `RUST_LOG`, defaulting to `info`

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{default_log_dir as config_log_dir, DEFAULT_LOG_FILE};

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// Creates `log_dir` if needed and truncates any previous log file. Fails if
/// the directory cannot be created, the file cannot be cleared, or a global
/// subscriber is already installed.
pub fn init_logging(
    log_dir: &Path,
    log_file: &str,
    stdout_enabled: bool,
) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_names(true);

    let stdout_layer = stdout_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .compact()
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory (~/.stockpile/logs).
pub fn default_log_dir() -> std::path::PathBuf {
    config_log_dir()
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    DEFAULT_LOG_FILE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        assert!(default_log_dir().ends_with(".stockpile/logs"));
        assert_eq!(default_log_file(), "stockpile.log");
    }

    #[test]
    fn test_guard_structure() {
        use tracing_appender::non_blocking::NonBlocking;

        let (non_blocking, guard) = NonBlocking::new(std::io::sink());
        drop(non_blocking);

        let _logging_guard = LoggingGuard { _file_guard: guard };
    }

    // Only one test may install the global subscriber.
    #[test]
    fn test_init_logging_clears_previous_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("logs");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("run.log"), "old log data").unwrap();

        let _guard = init_logging(&dir, "run.log", false);

        let contents = fs::read_to_string(dir.join("run.log")).unwrap();
        assert!(!contents.contains("old log data"));
    }
}
