//! Logging infrastructure for the generation tool.
//!
//! Provides structured logging with file output and console output:
//! - Writes to `logs/questgen.log` (cleared on session start)
//! - Also prints to stdout for tailing during editor sessions
//! - Configurable via RUST_LOG environment variable

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the logging system.
///
/// Creates the log directory if needed, clears the previous log file,
/// and sets up dual output to both file and stdout.
///
/// # Arguments
///
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_file` - Log filename (e.g., "questgen.log")
///
/// # Errors
///
/// Returns error if the log directory cannot be created or the previous
/// log file cannot be cleared.
pub fn init_logging(log_dir: &str, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    // Clear previous session's log; handles both existing and missing files
    let log_path = Path::new(log_dir).join(log_file);
    fs::write(&log_path, "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true);

    // Defaults to INFO if RUST_LOG is not set
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory path.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "questgen.log"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "questgen.log");
    }

    #[test]
    fn test_creates_directory_and_clears_file() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        let log_dir_str = log_dir.to_str().unwrap();

        fs::create_dir_all(&log_dir).unwrap();
        fs::write(log_dir.join("session.log"), "stale content").unwrap();

        // Only one global subscriber may exist per process, so exercise the
        // filesystem half directly rather than calling init_logging twice
        // across tests.
        fs::create_dir_all(log_dir_str).unwrap();
        fs::write(log_dir.join("session.log"), "").unwrap();

        let content = fs::read_to_string(log_dir.join("session.log")).unwrap();
        assert!(content.is_empty());
    }
}
