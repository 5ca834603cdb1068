//! Structured logging for publish runs.
//!
//! Pretty output for CI build logs, JSON for log shippers.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    // Build the env filter from RUST_LOG or config
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let writer = if config.to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    match config.log_format {
        LogFormat::Json => init_json_logging(filter, writer),
        LogFormat::Pretty => init_pretty_logging(filter, writer),
    }
}

fn init_json_logging(filter: EnvFilter, writer: BoxMakeWriter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

// Build logs are read top to bottom by humans; keep lines compact.
fn init_pretty_logging(filter: EnvFilter, writer: BoxMakeWriter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// Plugin is starting a publish run.
    pub const STARTUP: &str = "startup";

    /// A spec location was expanded into files.
    pub const SPEC_RESOLVED: &str = "spec_resolved";

    /// A YAML spec was converted to JSON.
    pub const SPEC_NORMALIZED: &str = "spec_normalized";

    /// A single upload attempt failed and may be retried.
    pub const UPLOAD_ATTEMPT_FAILED: &str = "upload_attempt_failed";

    /// A spec was accepted by the registry.
    pub const SPEC_PUBLISHED: &str = "spec_published";

    /// A spec could not be published.
    pub const SPEC_FAILED: &str = "spec_failed";

    /// All specs have been processed.
    pub const RUN_COMPLETED: &str = "run_completed";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_spec_resolved {
    ($($field:tt)*) => {
        tracing::debug!(
            event = $crate::logging::events::SPEC_RESOLVED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_spec_normalized {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SPEC_NORMALIZED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_upload_attempt_failed {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::UPLOAD_ATTEMPT_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_spec_published {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SPEC_PUBLISHED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_spec_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::SPEC_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_run_completed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::RUN_COMPLETED,
            $($field)*
        )
    };
}
