//! OpenAPI spec publishing pipeline.
//!
//! A run goes through four stages for every spec:
//! 1. `resolver` expands configured locations (paths, globs, directories)
//! 2. `normalize` converts YAML specs to a sibling JSON file
//! 3. `auth` builds a client carrying an API key or an identity token
//! 4. `upload` posts the file as multipart with bounded retries
//!
//! `publish::PublishOrchestrator` runs the stages concurrently across specs
//! and aggregates per-file failures.

pub mod auth;
pub mod error;
pub mod multipart;
pub mod normalize;
pub mod publish;
pub mod request;
pub mod resolver;
pub mod transport;
pub mod upload;

pub use auth::{AuthStrategy, AuthenticatedClient, CredentialProvider};
pub use error::{
    AuthError, ConfigError, NormalizationError, PublishError, ResolutionError, UploadError,
};
pub use normalize::{FormatNormalizer, NormalizedSpec};
pub use publish::{FileFailure, PublishOptions, PublishOrchestrator, PublishResult};
pub use request::{PublishRequest, ServiceCredential};
pub use resolver::{ResolvedSpec, SpecResolver};
pub use transport::{HttpClientConfig, ReqwestTransport, Transport, TransportError};
pub use upload::{RetryPolicy, UploadOutcome, Uploader};
