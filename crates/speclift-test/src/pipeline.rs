//! End-to-end publish runs over real HTTP against the mock registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use speclift_core::{
    CredentialProvider, HttpClientConfig, PublishError, PublishOptions, PublishOrchestrator,
    PublishRequest, ReqwestTransport, RetryPolicy, ServiceCredential, Uploader,
};

use crate::{service_account_for, MockRegistry, Workspace};

fn orchestrator(policy: RetryPolicy) -> PublishOrchestrator {
    let transport = ReqwestTransport::new(HttpClientConfig::default()).expect("http client");
    PublishOrchestrator::new(
        CredentialProvider::with_google_tokens(Arc::new(transport)),
        Uploader::new(policy),
    )
}

fn quick_retries() -> RetryPolicy {
    RetryPolicy {
        backoff_step: Duration::from_millis(20),
        ..RetryPolicy::default()
    }
}

fn keyed_request(registry: &MockRegistry, locations: &[&str]) -> PublishRequest {
    PublishRequest::new(
        locations.iter().map(|l| l.to_string()).collect(),
        "platform",
        registry.upload_url(),
    )
    .with_api_key("s3cret")
}

#[tokio::test]
async fn yaml_spec_is_uploaded_as_json() {
    let registry = MockRegistry::start().await;
    registry.accept_uploads().await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/hello_world_spec.yml", "openapi/hello_world_spec.yml");

    let result = orchestrator(quick_retries())
        .run(
            &keyed_request(&registry, &["openapi/hello_world_spec.yml"]),
            ws.path(),
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    assert!(ws.path().join("openapi/hello_world_spec.json").exists());

    let uploads = registry.uploads().await;
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.query.as_deref(), Some("key=s3cret"));
    assert_eq!(upload.authorization, None);
    assert_eq!(upload.filename.as_deref(), Some("hello_world_spec.json"));
    assert_eq!(upload.team.as_deref(), Some("platform"));
    assert!(upload
        .content_type
        .as_deref()
        .unwrap()
        .starts_with("multipart/form-data; boundary="));

    let spec = upload.file_json();
    assert_eq!(spec["info"]["title"], "Hello World");
    assert_eq!(
        spec["paths"]["/hello"]["get"]["responses"]["200"]["description"],
        "A greeting"
    );
}

#[tokio::test]
async fn retries_until_registry_accepts() {
    let registry = MockRegistry::start().await;
    registry.answer_uploads_in_sequence(&[500, 500]).await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/petstore.json", "petstore.json");

    let started = Instant::now();
    let result = orchestrator(RetryPolicy::default())
        .run(&keyed_request(&registry, &["petstore.json"]), ws.path())
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(result.outcomes[0].attempts, 3);
    // Linear backoff: 1s after the first failure, 2s after the second.
    assert!(started.elapsed() >= Duration::from_secs(3));

    let uploads = registry.uploads().await;
    assert_eq!(uploads.len(), 3);
    assert!(uploads.iter().all(|u| u.body == uploads[0].body));
}

#[tokio::test]
async fn gives_up_after_three_attempts() {
    let registry = MockRegistry::start().await;
    registry.answer_uploads(503).await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/petstore.json", "petstore.json");

    let result = orchestrator(quick_retries())
        .run(&keyed_request(&registry, &["petstore.json"]), ws.path())
        .await
        .unwrap();

    assert!(!result.succeeded());
    assert_eq!(registry.uploads().await.len(), 3);

    let failures = result.into_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].error,
        PublishError::Upload { attempts: 3, .. }
    ));
    assert!(failures[0].error.to_string().contains("503"));
}

#[tokio::test]
async fn service_account_uploads_carry_bearer_token() {
    let registry = MockRegistry::start().await;
    registry.issue_id_tokens("minted-id-token").await;
    registry.accept_uploads().await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/petstore.json", "petstore.json");

    let request = PublishRequest::new(vec!["petstore.json".into()], "platform", registry.upload_url())
        .with_service_credential(ServiceCredential::new(service_account_for(
            &registry.token_url(),
        )));

    let result = orchestrator(quick_retries())
        .run(&request, ws.path())
        .await
        .unwrap();

    assert!(result.succeeded());
    let uploads = registry.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(
        uploads[0].authorization.as_deref(),
        Some("Bearer minted-id-token")
    );
    assert_eq!(uploads[0].query, None);

    let grants = registry.token_requests().await;
    assert_eq!(grants.len(), 1);
    assert!(grants[0].contains("assertion="));
}

#[tokio::test]
async fn directory_is_published_file_by_file() {
    let registry = MockRegistry::start().await;
    registry.accept_uploads().await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/hello_world_spec.yml", "openapi/hello.yml");
    ws.copy_fixture("specs/petstore.json", "openapi/petstore.json");

    let result = orchestrator(quick_retries())
        .with_options(PublishOptions::default().with_pacing(Duration::from_millis(10)))
        .run(&keyed_request(&registry, &["openapi"]), ws.path())
        .await
        .unwrap();

    assert!(result.succeeded());
    let mut names: Vec<String> = registry
        .uploads()
        .await
        .into_iter()
        .filter_map(|u| u.filename)
        .collect();
    names.sort();
    assert_eq!(names, vec!["hello.json", "petstore.json"]);
}

#[tokio::test]
async fn one_bad_file_does_not_block_the_rest() {
    let registry = MockRegistry::start().await;
    registry.accept_uploads().await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/hello_world_spec.yml", "a.yml");
    ws.copy_fixture("specs/invalid.yml", "b.yml");
    ws.copy_fixture("specs/petstore.json", "c.json");

    let result = orchestrator(quick_retries())
        .run(&keyed_request(&registry, &["a.yml", "b.yml", "c.json"]), ws.path())
        .await
        .unwrap();

    assert!(!result.succeeded());
    assert_eq!(result.published(), 2);
    assert_eq!(registry.uploads().await.len(), 2);
    assert!(!ws.path().join("b.json").exists());
}

#[tokio::test]
async fn yaml_shadowing_a_json_spec_is_reported_not_written() {
    let registry = MockRegistry::start().await;
    registry.accept_uploads().await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/petstore.json", "openapi/api.json");
    ws.copy_fixture("specs/hello_world_spec.yml", "openapi/api.yml");

    let result = orchestrator(quick_retries())
        .run(&keyed_request(&registry, &["openapi"]), ws.path())
        .await
        .unwrap();

    assert!(!result.succeeded());
    assert_eq!(result.published(), 1);

    let uploads = registry.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].file_json()["info"]["title"], "Petstore");

    let on_disk: serde_json::Value =
        serde_json::from_slice(&std::fs::read(ws.path().join("openapi/api.json")).unwrap()).unwrap();
    assert_eq!(on_disk["info"]["title"], "Petstore");

    let failures = result.into_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error.to_string().contains("both publish as"));
}

#[tokio::test]
async fn missing_team_uploads_nothing() {
    let registry = MockRegistry::start().await;
    registry.accept_uploads().await;
    let ws = Workspace::new();
    ws.copy_fixture("specs/petstore.json", "petstore.json");

    let request = PublishRequest::new(vec!["petstore.json".into()], "", registry.upload_url())
        .with_api_key("k");
    let err = orchestrator(quick_retries())
        .run(&request, ws.path())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "missing required param: team");
    assert!(registry.uploads().await.is_empty());
}
