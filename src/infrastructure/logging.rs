//! Logging system configuration and initialization.
//!
//! Console output by default, optional non-blocking rolling file output,
//! level taken from the config file with a `RUST_LOG` override.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive for the process lifetime.
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialize the logging system with default configuration.
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize the logging system from the loaded config. `RUST_LOG` wins
/// over the configured level when set.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.file_output {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "sqp-sync.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
        if config.json_format {
            registry
                .with(fmt::layer())
                .with(file_layer.json())
                .try_init()?;
        } else {
            registry.with(fmt::layer()).with(file_layer).try_init()?;
        }
    } else if config.json_format {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }

    Ok(())
}
