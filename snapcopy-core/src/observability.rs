/*!
Logging setup for snapshot copy runs.

Two layers are installed on a tracing registry:
- stderr, filtered by `RUST_LOG` or the configured console level
- an append-only log file that always records this workspace's crates at
  debug level, so a run can be reconstructed after the fact
*/

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::{Result, SnapCopyError};

/// Log file used when none is configured, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "logs/ipf-snapcopy.log";

const FILE_FILTER: &str = "info,snapcopy_core=debug,snapcopy_retry=debug,ipf_snapcopy=debug";

/// Where and how verbosely to log
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level or filter directive for stderr, e.g. `info` or `snapcopy_core=debug`
    pub console_level: String,
    /// Log file to append to; `None` disables file logging
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: "info".to_string(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}

/// Open `path` for appending, creating parent directories as needed
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            SnapCopyError::config(format!(
                "cannot create log directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SnapCopyError::config(format!("cannot open log file {}: {e}", path.display())))
}

fn console_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| SnapCopyError::config(format!("invalid log level '{level}': {e}"))),
    }
}

/// Install the global tracing subscriber
///
/// # Errors
/// Fails when the log file cannot be opened, the level does not parse, or a
/// global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(console_filter(&config.console_level)?);

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(EnvFilter::new(FILE_FILTER)),
            )
        }
        None => None,
    };

    let subscriber = Registry::default().with(console_layer).with(file_layer);

    set_global_default(subscriber).map_err(|e| {
        SnapCopyError::config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("-------------- STARTING ipf-snapcopy --------------");
    Ok(())
}
