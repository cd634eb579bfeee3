//! Structured logging initialization.
//!
//! The RUST_LOG environment variable takes precedence over the configured level.

use crate::config::{LogFormat, LoggingConfig};
use std::io::IsTerminal;
use tracing::Subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Initialize the global subscriber.
///
/// Fails if a global subscriber has already been installed.
///
/// ```ignore
/// use sockd::config::LoggingConfig;
///
/// sockd::logging::init(&LoggingConfig::default())?;
/// tracing::info!("server starting");
/// ```
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.as_str())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output_layer(config))
        .try_init()
}

fn output_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let ansi = std::io::stdout().is_terminal();
    let base = fmt::layer()
        .with_target(config.target)
        .with_thread_names(config.thread_names);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.with_ansi(ansi).boxed(),
        (LogFormat::Pretty, false) => base.with_ansi(ansi).without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().with_ansi(ansi).boxed(),
        (LogFormat::Compact, false) => base.compact().with_ansi(ansi).without_time().boxed(),
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
    }
}
