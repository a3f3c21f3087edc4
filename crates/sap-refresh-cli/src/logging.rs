//! Console and daily file logging.

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "sap-refresh.log";

/// Keeps the file writer flushing until dropped.
pub struct LogGuard {
    _worker: WorkerGuard,
    log_file: PathBuf,
}

impl LogGuard {
    /// Today's log file.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Log to the console at the `RUST_LOG` (or verbosity) level and at info and
/// above to `<log_dir>/sap-refresh.log.<date>`.
pub fn init_logging(log_dir: &Path, verbose: u8) -> io::Result<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose >= 2))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::INFO),
        )
        .try_init()
        .map_err(io::Error::other)?;

    // The appender names files by UTC date
    let log_file = log_dir.join(format!(
        "{LOG_FILE_PREFIX}.{}",
        chrono::Utc::now().format("%Y-%m-%d")
    ));
    tracing::debug!("Logging to {}", log_file.display());
    Ok(LogGuard {
        _worker: worker,
        log_file,
    })
}
