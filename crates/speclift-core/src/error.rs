use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Missing or contradictory settings. Fatal: nothing is uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required params: key or google_credentials")]
    MissingCredentials,

    #[error("missing required param: spec")]
    MissingSpec,

    #[error("only one of spec or specs_dir was expected")]
    ConflictingSpecSources,

    #[error("missing required param: team")]
    MissingTeam,

    #[error("missing required param: uploader_url")]
    MissingUploaderUrl,

    #[error("invalid uploader_url: {0}")]
    InvalidUploaderUrl(String),

    /// The configuration source itself could not be read.
    #[error("unable to load plugin configuration: {0}")]
    Source(String),
}

/// A spec location that could not be expanded.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("invalid spec pattern '{location}': {message}")]
    Pattern { location: String, message: String },

    #[error("unable to list spec directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{} and {} both publish as {}",
        claimed_by.display(),
        path.display(),
        target.display()
    )]
    Collision {
        path: PathBuf,
        target: PathBuf,
        claimed_by: PathBuf,
    },
}

/// YAML to JSON conversion failures.
#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("unable to read spec file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to convert spec file {} to JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("spec file {} has no JSON representation: {reason}", path.display())]
    Unrepresentable { path: PathBuf, reason: String },

    #[error("unable to write spec file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while producing authentication material.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no usable uploader credentials")]
    NoCredentials,

    #[error("unable to parse service account credentials: {0}")]
    MalformedCredential(String),

    #[error("invalid uploader URL: {0}")]
    InvalidUrl(String),

    #[error("unable to obtain identity token: {0}")]
    Token(String),
}

/// Why a single upload attempt failed. Retried by the uploader.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("publish request timed out")]
    Timeout,

    #[error("unable to make publish request: {0}")]
    Transport(TransportError),

    #[error("registry answered {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<TransportError> for UploadError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => UploadError::Timeout,
            other => UploadError::Transport(other),
        }
    }
}

/// Any error that can stop one spec from being published.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Every attempt failed; carries the last attempt's error.
    #[error("unable to publish spec after {attempts} attempts: {last}")]
    Upload { attempts: u32, last: UploadError },

    #[error("unable to open spec file {}: {source}", path.display())]
    Payload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A publish task panicked or was cancelled.
    #[error("publish task aborted: {0}")]
    Task(String),
}
