//! speclift: Drone plugin publishing OpenAPI specs to a spec registry.
//!
//! Exit codes: 0 every spec published, 1 at least one spec failed,
//! 2 invalid configuration, 3 the plugin could not start.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use speclift_core::{
    CredentialProvider, HttpClientConfig, PublishOptions, PublishOrchestrator, ReqwestTransport,
    RetryPolicy, Uploader,
};
use speclift_lib::{
    build_version, ConfigSource, EnvConfigSource, PluginSettings, StdinConfigSource,
    ValidatedSettings,
};
use speclift_telemetry::{LogFormat, TelemetryConfig};

const EXIT_PUBLISH_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_STARTUP: u8 = 3;

/// Pause between file starts when publishing a whole directory.
const DIRECTORY_PACING: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConfigSourceKind {
    /// `PLUGIN_*` environment variables (Drone 0.5+).
    Env,
    /// JSON payload on stdin (Drone 0.4).
    Stdin,
}

#[derive(Parser, Debug)]
#[command(name = "speclift", about = "Publish OpenAPI specs to a spec registry", version)]
struct Cli {
    /// Where plugin settings are read from.
    #[arg(long, value_enum, default_value = "env")]
    config_source: ConfigSourceKind,

    /// Log level (overridden by RUST_LOG).
    #[arg(long, env = "SPECLIFT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (json or pretty).
    #[arg(long, env = "SPECLIFT_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    /// Write log events to stderr instead of stdout.
    #[arg(long, env = "SPECLIFT_LOG_STDERR")]
    log_stderr: bool,

    /// Maximum number of specs uploaded at once (default: unbounded).
    #[arg(long, env = "SPECLIFT_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Milliseconds to wait between starting consecutive specs.
    #[arg(long, env = "SPECLIFT_PACING_MS")]
    pacing_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(log_format) = LogFormat::parse(&cli.log_format) else {
        eprintln!("error: invalid log format '{}' (expected json or pretty)", cli.log_format);
        return ExitCode::from(EXIT_CONFIG);
    };
    let telemetry = TelemetryConfig::new()
        .with_log_level(cli.log_level.as_str())
        .with_log_format(log_format)
        .with_stderr(cli.log_stderr);
    if let Err(e) = speclift_telemetry::init_logging(&telemetry) {
        eprintln!("error: {}", e);
        return ExitCode::from(EXIT_STARTUP);
    }

    let settings = match load_settings(cli.config_source) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let orchestrator = match build_orchestrator(&cli, &settings) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    run_publish(&orchestrator, &settings).await
}

fn load_settings(kind: ConfigSourceKind) -> Result<ValidatedSettings, speclift_core::ConfigError> {
    let raw: PluginSettings = match kind {
        ConfigSourceKind::Env => EnvConfigSource::from_process().load()?,
        ConfigSourceKind::Stdin => StdinConfigSource::new(std::io::stdin().lock()).load()?,
    };
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    raw.validate(cwd)
}

fn build_orchestrator(
    cli: &Cli,
    settings: &ValidatedSettings,
) -> anyhow::Result<PublishOrchestrator> {
    let transport = ReqwestTransport::new(HttpClientConfig::default())
        .context("failed to build HTTP client")?;

    let pacing = match cli.pacing_ms {
        Some(ms) => Duration::from_millis(ms),
        None if settings.directory_mode => DIRECTORY_PACING,
        None => Duration::ZERO,
    };
    let mut options = PublishOptions::default()
        .with_pacing(pacing)
        .with_version(build_version());
    if let Some(limit) = cli.max_concurrency {
        options = options.with_max_concurrency(limit);
    }

    Ok(PublishOrchestrator::new(
        CredentialProvider::with_google_tokens(Arc::new(transport)),
        Uploader::new(RetryPolicy::default()),
    )
    .with_options(options))
}

async fn run_publish(orchestrator: &PublishOrchestrator, settings: &ValidatedSettings) -> ExitCode {
    let result = match orchestrator
        .run(&settings.request, &settings.workspace_root)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if result.succeeded() {
        eprintln!("published {} spec(s)", result.published());
        return ExitCode::SUCCESS;
    }

    let published = result.published();
    let failures = result.into_failures();
    for failure in &failures {
        match &failure.spec {
            Some(spec) => eprintln!("  {}: {}", spec.display(), failure.error),
            None => eprintln!("  {}", failure.error),
        }
    }
    eprintln!(
        "error publishing specs: {} published, {} failed",
        published,
        failures.len()
    );
    ExitCode::from(EXIT_PUBLISH_FAILED)
}
