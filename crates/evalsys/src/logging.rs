//! Process-wide log setup.
//!
//! Library code logs through the `log` facade; records are bridged into
//! `tracing` so job spans and log lines share one subscriber.

use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Failure to install the global subscriber (usually: already installed).
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to bridge log records: {0}")]
    Bridge(#[from] log::SetLoggerError),

    #[error("failed to install subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, json: bool) -> Result<(), LoggingError> {
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true);
        tracing::subscriber::set_global_default(registry.with(layer))?;
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        tracing::subscriber::set_global_default(registry.with(layer))?;
    }
    Ok(())
}
