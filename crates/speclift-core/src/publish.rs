//! The publish run: resolve, then normalize and upload every spec.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use speclift_telemetry::{log_run_completed, log_spec_failed, log_startup};
use tokio::sync::Semaphore;

use crate::auth::CredentialProvider;
use crate::error::{ConfigError, PublishError};
use crate::normalize::FormatNormalizer;
use crate::request::PublishRequest;
use crate::resolver::{ResolvedSpec, SpecResolver};
use crate::upload::{UploadOutcome, Uploader};

/// Scheduling knobs for a run.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Cap on concurrent uploads. `None` runs every spec at once.
    pub max_concurrency: Option<usize>,
    /// Pause between starting consecutive specs.
    pub pacing: Duration,
    /// Build version reported at startup.
    pub version: String,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            pacing: Duration::ZERO,
            version: "[unknown]".to_string(),
        }
    }
}

impl PublishOptions {
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// A spec (or location) that failed before any upload attempt.
#[derive(Debug)]
pub struct FileFailure {
    /// The spec file, when the failure is tied to one.
    pub spec: Option<PathBuf>,
    pub error: PublishError,
}

/// Aggregate over every spec of a run.
#[derive(Debug, Default)]
pub struct PublishResult {
    pub outcomes: Vec<UploadOutcome>,
    pub failures: Vec<FileFailure>,
}

impl PublishResult {
    /// True iff every spec was published.
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && self.outcomes.iter().all(|o| o.succeeded)
    }

    pub fn published(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    /// Number of specs that did not make it to the registry.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.published() + self.failures.len()
    }

    /// Every file-level failure of the run, upload failures first.
    pub fn into_failures(self) -> Vec<FileFailure> {
        let uploads = self.outcomes.into_iter().filter_map(|o| {
            o.error().map(|error| FileFailure {
                spec: Some(o.spec),
                error,
            })
        });
        uploads.chain(self.failures).collect()
    }
}

/// Drives a publish run.
#[derive(Clone)]
pub struct PublishOrchestrator {
    resolver: SpecResolver,
    normalizer: FormatNormalizer,
    credentials: CredentialProvider,
    uploader: Uploader,
    options: PublishOptions,
}

impl PublishOrchestrator {
    pub fn new(credentials: CredentialProvider, uploader: Uploader) -> Self {
        Self {
            resolver: SpecResolver::new(),
            normalizer: FormatNormalizer::new(),
            credentials,
            uploader,
            options: PublishOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Publish every spec of `request`.
    ///
    /// Only configuration errors fail the call; per-spec problems are
    /// collected in the result while the remaining specs carry on.
    pub async fn run(
        &self,
        request: &PublishRequest,
        workspace_root: &Path,
    ) -> Result<PublishResult, ConfigError> {
        request.validate()?;

        log_startup!(
            version = %self.options.version,
            team = %request.team,
            locations = request.spec_locations.len(),
            "Publishing OpenAPI specs"
        );

        let mut result = PublishResult::default();

        let resolution = self
            .resolver
            .resolve(&request.spec_locations, workspace_root);
        for error in resolution.errors {
            log_spec_failed!(error = %error, "Unable to resolve spec location");
            result.failures.push(FileFailure {
                spec: None,
                error: error.into(),
            });
        }

        let request = Arc::new(request.clone());
        let limiter = self
            .options
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n)));

        let mut tasks = Vec::with_capacity(resolution.specs.len());
        for (index, spec) in resolution.specs.into_iter().enumerate() {
            if index > 0 && !self.options.pacing.is_zero() {
                tokio::time::sleep(self.options.pacing).await;
            }

            let this = self.clone();
            let request = request.clone();
            let limiter = limiter.clone();
            let task_spec = spec.clone();
            let handle = tokio::spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|e| {
                        PublishError::Task(format!("concurrency limiter closed: {}", e))
                    })?),
                    None => None,
                };
                this.publish_one(&task_spec, &request).await
            });
            tasks.push((spec, handle));
        }

        // Every task is joined before the run is decided.
        for (spec, handle) in tasks {
            let failure = match handle.await {
                Ok(Ok(outcome)) => {
                    if !outcome.succeeded {
                        log_spec_failed!(
                            spec = %spec,
                            attempts = outcome.attempts,
                            status = outcome.last_status,
                            "Unable to publish spec"
                        );
                    }
                    result.outcomes.push(outcome);
                    continue;
                }
                Ok(Err(error)) => error,
                Err(join_error) => PublishError::Task(join_error.to_string()),
            };

            log_spec_failed!(spec = %spec, error = %failure, "Unable to publish spec");
            result.failures.push(FileFailure {
                spec: Some(spec.into_path()),
                error: failure,
            });
        }

        log_run_completed!(
            published = result.published(),
            failed = result.failed(),
            "Publish run finished"
        );

        Ok(result)
    }

    async fn publish_one(
        &self,
        spec: &ResolvedSpec,
        request: &PublishRequest,
    ) -> Result<UploadOutcome, PublishError> {
        let normalizer = self.normalizer;
        let source = spec.clone();
        let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(&source))
            .await
            .map_err(|e| PublishError::Task(e.to_string()))??;

        let client = self
            .credentials
            .authenticate(
                request.api_key(),
                request.service_credential(),
                &request.endpoint_url,
            )
            .await?;

        self.uploader
            .upload(&normalized, &request.team, &client)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{IdTokenSource, ServiceAccountKey};
    use crate::error::{AuthError, NormalizationError};
    use crate::request::ServiceCredential;
    use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
    use crate::upload::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Accepts everything, except files whose name contains `fail`.
    #[derive(Default)]
    struct Registry {
        uploads: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Registry {
        async fn post(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let body = String::from_utf8_lossy(&request.body).into_owned();
            let filename = body
                .split("filename=\"")
                .nth(1)
                .and_then(|rest| rest.split('"').next())
                .unwrap_or_default()
                .to_string();
            self.uploads.lock().unwrap().push(filename.clone());

            if filename.contains("fail") {
                Ok(TransportResponse::new(500, "rejected"))
            } else {
                Ok(TransportResponse::new(200, "ok"))
            }
        }
    }

    struct NoTokens;

    #[async_trait]
    impl IdTokenSource for NoTokens {
        async fn id_token(&self, _: &ServiceAccountKey, _: &str) -> Result<String, AuthError> {
            Err(AuthError::Token("token endpoint unavailable".into()))
        }
    }

    fn orchestrator(registry: Arc<Registry>) -> PublishOrchestrator {
        let policy = RetryPolicy {
            backoff_step: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        PublishOrchestrator::new(
            CredentialProvider::new(registry, Arc::new(NoTokens)),
            Uploader::new(policy),
        )
    }

    fn workspace(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    fn request(locations: &[&str]) -> PublishRequest {
        PublishRequest::new(
            locations.iter().map(|l| l.to_string()).collect(),
            "platform",
            "https://registry.example.com/update",
        )
        .with_api_key("k")
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[tokio::test]
    async fn test_missing_credentials_aborts_before_io() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[("a.yml", "a: 1\n")]);
        let req = PublishRequest::new(vec!["a.yml".into()], "platform", "https://x.test");

        let err = orchestrator(registry.clone())
            .run(&req, ws.path())
            .await
            .unwrap_err();

        assert_eq!(err, ConfigError::MissingCredentials);
        assert!(registry.uploads.lock().unwrap().is_empty());
        assert!(!ws.path().join("a.json").exists());
    }

    #[tokio::test]
    async fn test_publishes_every_resolved_spec() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[("a.yml", "a: 1\n"), ("b.json", "{}")]);

        let result = orchestrator(registry.clone())
            .run(&request(&["*"]), ws.path())
            .await
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(result.published(), 2);
        assert_eq!(result.failed(), 0);
        assert_eq!(
            sorted(registry.uploads.lock().unwrap().clone()),
            vec!["a.json", "b.json"]
        );
    }

    #[tokio::test]
    async fn test_normalization_failure_is_isolated() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[
            ("one.yml", "a: 1\n"),
            ("two.yml", "a: [1, 2\nb: }\n"),
            ("three.yml", "c: 3\n"),
        ]);

        let result = orchestrator(registry.clone())
            .run(&request(&["one.yml", "two.yml", "three.yml"]), ws.path())
            .await
            .unwrap();

        assert!(!result.succeeded());
        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcomes.iter().all(|o| o.succeeded));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.failures[0].spec, Some(ws.path().join("two.yml")));
        assert!(matches!(
            result.failures[0].error,
            PublishError::Normalization(NormalizationError::Parse { .. })
        ));
        assert_eq!(
            sorted(registry.uploads.lock().unwrap().clone()),
            vec!["one.json", "three.json"]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_stop_siblings() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[("ok.json", "{}"), ("fail.json", "{}")]);

        let result = orchestrator(registry.clone())
            .run(&request(&["ok.json", "fail.json"]), ws.path())
            .await
            .unwrap();

        assert!(!result.succeeded());
        assert_eq!(result.published(), 1);
        // One attempt for ok.json, three for fail.json.
        assert_eq!(registry.uploads.lock().unwrap().len(), 4);
        let failures = result.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].spec, Some(ws.path().join("fail.json")));
        assert!(matches!(failures[0].error, PublishError::Upload { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_missing_literal_spec_fails_at_upload() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[]);

        let result = orchestrator(registry)
            .run(&request(&["nope.json"]), ws.path())
            .await
            .unwrap();

        assert!(!result.succeeded());
        assert!(matches!(
            result.failures[0].error,
            PublishError::Payload { .. }
        ));
    }

    #[tokio::test]
    async fn test_resolution_error_is_reported() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[("a.json", "{}")]);

        let result = orchestrator(registry)
            .run(&request(&["[", "a.json"]), ws.path())
            .await
            .unwrap();

        assert!(!result.succeeded());
        assert_eq!(result.published(), 1);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].spec.is_none());
        assert!(matches!(
            result.failures[0].error,
            PublishError::Resolution(_)
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_is_per_file() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[("a.json", "{}"), ("b.json", "{}")]);
        let req = PublishRequest::new(
            vec!["a.json".into(), "b.json".into()],
            "platform",
            "https://registry.example.com/update",
        )
        .with_service_credential(ServiceCredential::new("{broken"));

        let result = orchestrator(registry.clone())
            .run(&req, ws.path())
            .await
            .unwrap();

        assert_eq!(result.failures.len(), 2);
        assert!(result
            .failures
            .iter()
            .all(|f| matches!(f.error, PublishError::Auth(AuthError::MalformedCredential(_)))));
        assert!(registry.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[
            ("a.json", "{}"),
            ("b.json", "{}"),
            ("c.json", "{}"),
            ("d.json", "{}"),
        ]);

        let result = orchestrator(registry.clone())
            .with_options(PublishOptions::default().with_max_concurrency(1))
            .run(&request(&["*.json"]), ws.path())
            .await
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(registry.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_starts() {
        let registry = Arc::new(Registry::default());
        let ws = workspace(&[("a.json", "{}"), ("b.json", "{}"), ("c.json", "{}")]);

        let started = tokio::time::Instant::now();
        let result = orchestrator(registry)
            .with_options(PublishOptions::default().with_pacing(Duration::from_secs(1)))
            .run(&request(&["*.json"]), ws.path())
            .await
            .unwrap();

        assert!(result.succeeded());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
