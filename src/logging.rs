//! Tracing subscriber setup.
//!
//! `RUST_LOG` overrides the configured level. Step threads are named
//! `pipeline:step.copy`, so enabling thread names in the output shows which
//! step copy emitted each line.

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Prefix of the daily rolling log files.
pub const LOG_FILE_PREFIX: &str = "rowflow.log";

/// Install the global subscriber.
///
/// Returns the file writer guard when logging to a directory; keep it alive
/// for as long as logs should be flushed. Calling this again after a
/// subscriber is installed does nothing.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_names(config.thread_names)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(config.thread_names))
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized at level '{}'", config.level);
        guard
    } else {
        None
    }
}
