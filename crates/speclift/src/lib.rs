//! Library surface of the `speclift` plugin binary.

pub mod config;

pub use config::{ConfigSource, EnvConfigSource, PluginSettings, StdinConfigSource, ValidatedSettings};

/// Version string reported at startup: the package version, plus the build
/// revision when one was baked in at compile time.
pub fn build_version() -> String {
    match option_env!("SPECLIFT_BUILD_REV") {
        Some(rev) if !rev.is_empty() => format!("{} ({})", env!("CARGO_PKG_VERSION"), rev),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    }
}
