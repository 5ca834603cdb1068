//! Spec upload with bounded retries.

use std::path::PathBuf;
use std::time::Duration;

use speclift_telemetry::{log_spec_published, log_upload_attempt_failed};

use crate::auth::AuthenticatedClient;
use crate::error::{PublishError, UploadError};
use crate::multipart::{MultipartBuilder, MultipartPayload};
use crate::normalize::NormalizedSpec;
use crate::transport::TransportError;

/// How hard to try before giving up on a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Deadline applied to each attempt.
    pub attempt_timeout: Duration,
    /// Backoff after attempt `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(15),
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Pause after the given failed attempt (1-based). Linear, not exponential.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// What happened to one spec upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// The file the resolver selected.
    pub spec: PathBuf,
    pub succeeded: bool,
    /// Attempts made, between 1 and the policy's maximum.
    pub attempts: u32,
    pub last_error: Option<UploadError>,
    pub last_status: Option<u16>,
}

impl UploadOutcome {
    /// The failure as a publish error, if the upload failed.
    pub fn error(&self) -> Option<PublishError> {
        if self.succeeded {
            return None;
        }
        let last = self.last_error.clone().unwrap_or(UploadError::Status {
            status: self.last_status.unwrap_or_default(),
            body: String::new(),
        });
        Some(PublishError::Upload {
            attempts: self.attempts,
            last,
        })
    }
}

/// Posts spec files to the registry.
#[derive(Debug, Clone, Default)]
pub struct Uploader {
    policy: RetryPolicy,
}

impl Uploader {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Build the form body for a spec: the `file` part and the `team` field.
    pub fn build_payload(spec: &NormalizedSpec, team: &str) -> Result<MultipartPayload, PublishError> {
        let contents = std::fs::read(&spec.path).map_err(|source| PublishError::Payload {
            path: spec.path.clone(),
            source,
        })?;
        let filename = spec
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(MultipartBuilder::new()
            .file("file", &filename, &contents)
            .text("team", team)
            .finish())
    }

    /// Upload one spec. Only a payload that cannot be built is an `Err`;
    /// delivery failures are reported in the outcome.
    pub async fn upload(
        &self,
        spec: &NormalizedSpec,
        team: &str,
        client: &AuthenticatedClient,
    ) -> Result<UploadOutcome, PublishError> {
        let payload = Self::build_payload(spec, team)?;
        Ok(self.send(spec, &payload, client).await)
    }

    async fn send(
        &self,
        spec: &NormalizedSpec,
        payload: &MultipartPayload,
        client: &AuthenticatedClient,
    ) -> UploadOutcome {
        let content_type = payload.content_type();
        let max_attempts = self.policy.max_attempts.max(1);

        let mut outcome = UploadOutcome {
            spec: spec.source.path().to_path_buf(),
            succeeded: false,
            attempts: 0,
            last_error: None,
            last_status: None,
        };

        for attempt in 1..=max_attempts {
            outcome.attempts = attempt;
            tracing::debug!(spec = %spec.path.display(), attempt, "Publishing spec file");

            // The deadline holds even for transports that ignore the request timeout.
            let result = tokio::time::timeout(
                self.policy.attempt_timeout,
                client.post(
                    &content_type,
                    payload.body.clone(),
                    self.policy.attempt_timeout,
                ),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout));

            match result {
                Ok(response) if response.status == 200 => {
                    outcome.succeeded = true;
                    outcome.last_status = Some(200);
                    outcome.last_error = None;
                    log_spec_published!(spec = %spec.path.display(), attempts = attempt, "Published spec file");
                    return outcome;
                }
                Ok(response) => {
                    outcome.last_status = Some(response.status);
                    outcome.last_error = Some(UploadError::Status {
                        status: response.status,
                        body: response.body_text(),
                    });
                }
                Err(e) => {
                    outcome.last_error = Some(UploadError::from(e));
                }
            }

            log_upload_attempt_failed!(
                spec = %spec.path.display(),
                attempt,
                status = outcome.last_status,
                error = %outcome.last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "Problem publishing spec"
            );

            if attempt < max_attempts {
                let pause = self.policy.backoff_after(attempt);
                tracing::debug!(pause_ms = pause.as_millis() as u64, "Sleeping before retry");
                tokio::time::sleep(pause).await;
            }
        }

        outcome
    }
}
