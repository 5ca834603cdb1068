//! Logging infrastructure for speclift.
//!
//! This crate provides:
//! - `tracing-subscriber` setup with JSON or pretty output
//! - Standard event names and `log_*!` macros shared by the pipeline
//!
//! # Usage
//!
//! ```ignore
//! use speclift_telemetry::{init_logging, LogFormat, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("debug")
//!     .with_log_format(LogFormat::Json);
//!
//! init_logging(&config)?;
//! ```

pub mod config;
pub mod logging;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::{events, init_logging};

use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}
