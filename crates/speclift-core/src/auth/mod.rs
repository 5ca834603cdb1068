//! Upload authentication.
//!
//! Two strategies exist:
//! - API key: `?key=<key>` on the uploader URL, no extra headers.
//! - Service account: an identity token for the uploader's origin, sent as
//!   `Authorization: Bearer <token>` on every request.
//!
//! When both are configured the API key wins and the service credential is
//! never parsed.

pub mod service_account;

pub use service_account::{GoogleIdTokenSource, IdTokenSource, ServiceAccountKey};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Url;

use crate::error::AuthError;
use crate::request::ServiceCredential;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};

/// Which credential authenticated a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    ApiKey,
    IdToken,
}

/// A transport bound to the uploader URL with its credential applied.
#[derive(Clone)]
pub struct AuthenticatedClient {
    transport: Arc<dyn Transport>,
    url: Url,
    bearer: Option<String>,
    strategy: AuthStrategy,
}

impl AuthenticatedClient {
    /// The target URL, including the `key` query parameter for key auth.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn strategy(&self) -> AuthStrategy {
        self.strategy
    }

    /// POST `body` to the target URL.
    pub async fn post(
        &self,
        content_type: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = TransportRequest::post(self.url.clone(), body, timeout)
            .with_header("Content-Type", content_type);
        if let Some(token) = &self.bearer {
            request = request.with_header("Authorization", format!("Bearer {}", token));
        }
        self.transport.post(request).await
    }
}

impl fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut url = self.url.clone();
        if self.strategy == AuthStrategy::ApiKey {
            url.set_query(Some("key=<redacted>"));
        }
        f.debug_struct("AuthenticatedClient")
            .field("url", &url.as_str())
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Produces authenticated clients for uploads.
#[derive(Clone)]
pub struct CredentialProvider {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn IdTokenSource>,
}

impl CredentialProvider {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn IdTokenSource>) -> Self {
        Self { transport, tokens }
    }

    /// Service-account tokens are minted through `transport` itself.
    pub fn with_google_tokens(transport: Arc<dyn Transport>) -> Self {
        let tokens = Arc::new(GoogleIdTokenSource::new(transport.clone()));
        Self::new(transport, tokens)
    }

    /// Pick a strategy and build a client for `target_url`.
    pub async fn authenticate(
        &self,
        api_key: Option<&str>,
        service_credential: Option<&ServiceCredential>,
        target_url: &str,
    ) -> Result<AuthenticatedClient, AuthError> {
        let mut url =
            Url::parse(target_url.trim()).map_err(|e| AuthError::InvalidUrl(e.to_string()))?;

        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            url.query_pairs_mut().append_pair("key", key);
            return Ok(AuthenticatedClient {
                transport: self.transport.clone(),
                url,
                bearer: None,
                strategy: AuthStrategy::ApiKey,
            });
        }

        let credential = service_credential
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::NoCredentials)?;
        let key = ServiceAccountKey::parse(credential)?;
        let token = self.tokens.id_token(&key, &audience_for(&url)?).await?;

        Ok(AuthenticatedClient {
            transport: self.transport.clone(),
            url,
            bearer: Some(token),
            strategy: AuthStrategy::IdToken,
        })
    }
}

/// Token audience for a target: `scheme://host[:port]`.
pub fn audience_for(url: &Url) -> Result<String, AuthError> {
    if url.host_str().is_none() {
        return Err(AuthError::InvalidUrl(format!("{} has no host", url)));
    }
    Ok(url.origin().ascii_serialization())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const FIXTURE: &str = include_str!("../../../../tests/fixtures/service-account.json");

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<TransportRequest>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn post(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(TransportResponse::new(200, ""))
        }
    }

    /// Hands out a fixed token and remembers the audiences asked for.
    #[derive(Default)]
    struct StaticTokens {
        audiences: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IdTokenSource for StaticTokens {
        async fn id_token(
            &self,
            _key: &ServiceAccountKey,
            audience: &str,
        ) -> Result<String, AuthError> {
            self.audiences.lock().unwrap().push(audience.to_string());
            Ok("id-token".to_string())
        }
    }

    fn provider() -> (
        Arc<RecordingTransport>,
        Arc<StaticTokens>,
        CredentialProvider,
    ) {
        let transport = Arc::new(RecordingTransport::default());
        let tokens = Arc::new(StaticTokens::default());
        let provider = CredentialProvider::new(transport.clone(), tokens.clone());
        (transport, tokens, provider)
    }

    #[tokio::test]
    async fn test_key_strategy_appends_query_param() {
        let (transport, _, provider) = provider();
        let client = provider
            .authenticate(Some("s3cret"), None, "https://registry.example.com/update")
            .await
            .unwrap();

        assert_eq!(client.strategy(), AuthStrategy::ApiKey);
        assert_eq!(
            client.url().as_str(),
            "https://registry.example.com/update?key=s3cret"
        );

        client
            .post("application/json", Bytes::from_static(b"{}"), Duration::from_secs(1))
            .await
            .unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].header("authorization"), None);
        assert_eq!(seen[0].header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_key_is_encoded_and_existing_query_kept() {
        let (_, _, provider) = provider();
        let client = provider
            .authenticate(Some("a&b"), None, "https://registry.example.com/update?v=2")
            .await
            .unwrap();
        assert_eq!(
            client.url().as_str(),
            "https://registry.example.com/update?v=2&key=a%26b"
        );
    }

    #[tokio::test]
    async fn test_token_strategy_attaches_bearer() {
        let (transport, tokens, provider) = provider();
        let credential = ServiceCredential::new(FIXTURE);
        let client = provider
            .authenticate(
                None,
                Some(&credential),
                "https://registry.example.com:8443/update",
            )
            .await
            .unwrap();

        assert_eq!(client.strategy(), AuthStrategy::IdToken);
        assert_eq!(
            tokens.audiences.lock().unwrap().as_slice(),
            ["https://registry.example.com:8443".to_string()]
        );

        client
            .post("text/plain", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].header("authorization"), Some("Bearer id-token"));
        assert_eq!(seen[0].url.query(), None);
    }

    #[tokio::test]
    async fn test_key_takes_precedence_over_credential() {
        let (_, tokens, provider) = provider();
        let credential = ServiceCredential::new(FIXTURE);

        for _ in 0..3 {
            let client = provider
                .authenticate(
                    Some("k"),
                    Some(&credential),
                    "https://registry.example.com/update",
                )
                .await
                .unwrap();
            assert_eq!(client.strategy(), AuthStrategy::ApiKey);
        }
        assert!(tokens.audiences.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_key_falls_back_to_credential() {
        let (_, _, provider) = provider();
        let credential = ServiceCredential::new(FIXTURE);
        let client = provider
            .authenticate(Some("  "), Some(&credential), "https://registry.example.com")
            .await
            .unwrap();
        assert_eq!(client.strategy(), AuthStrategy::IdToken);
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let (_, _, provider) = provider();
        let err = provider
            .authenticate(None, None, "https://registry.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoCredentials));
    }

    #[tokio::test]
    async fn test_malformed_credential() {
        let (_, tokens, provider) = provider();
        let credential = ServiceCredential::new("{\"client_email\": 1}");
        let err = provider
            .authenticate(None, Some(&credential), "https://registry.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedCredential(_)));
        assert!(tokens.audiences.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_target_url() {
        let (_, _, provider) = provider();
        let err = provider
            .authenticate(Some("k"), None, "registry without scheme")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidUrl(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = AuthenticatedClient {
            transport: Arc::new(RecordingTransport::default()),
            url: Url::parse("https://registry.example.com/update?key=s3cret").unwrap(),
            bearer: None,
            strategy: AuthStrategy::ApiKey,
        };
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("s3cret"));
    }
}
