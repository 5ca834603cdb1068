//! Service-account identity tokens.
//!
//! Exchanges a Google service-account key for an OpenID Connect identity
//! token via the JWT-bearer grant. The signed assertion carries
//! `target_audience`, so the token endpoint answers with an `id_token`
//! scoped to the registry host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Url;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::request::ServiceCredential;
use crate::transport::{Transport, TransportRequest};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth 2.0 JWT-bearer grant type (RFC 7523).
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime accepted by the token endpoint.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account key file needed to mint tokens.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parse the opaque credential blob.
    pub fn parse(credential: &ServiceCredential) -> Result<Self, AuthError> {
        let key: Self = serde_json::from_str(credential.as_str())
            .map_err(|e| AuthError::MalformedCredential(e.to_string()))?;

        if let Some(kind) = key.key_type.as_deref() {
            if kind != "service_account" {
                return Err(AuthError::MalformedCredential(format!(
                    "expected a service_account key, got '{}'",
                    kind
                )));
            }
        }
        if key.client_email.trim().is_empty() {
            return Err(AuthError::MalformedCredential(
                "client_email is empty".to_string(),
            ));
        }
        if key.private_key.trim().is_empty() {
            return Err(AuthError::MalformedCredential(
                "private_key is empty".to_string(),
            ));
        }
        Ok(key)
    }
}

/// Mints identity tokens for an audience.
#[async_trait]
pub trait IdTokenSource: Send + Sync {
    async fn id_token(&self, key: &ServiceAccountKey, audience: &str) -> Result<String, AuthError>;
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    target_audience: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// Build and sign the RS256 JWT assertion for the token exchange.
pub fn sign_assertion(
    key: &ServiceAccountKey,
    audience: &str,
    issued_at: i64,
) -> Result<String, AuthError> {
    let key_pair = load_signing_key(&key.private_key)?;

    let header = JwtHeader {
        alg: "RS256",
        typ: "JWT",
        kid: key.private_key_id.as_deref(),
    };
    let claims = AssertionClaims {
        iss: &key.client_email,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
        target_audience: audience,
    };

    let header = serde_json::to_vec(&header).map_err(|e| AuthError::Token(e.to_string()))?;
    let claims = serde_json::to_vec(&claims).map_err(|e| AuthError::Token(e.to_string()))?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    );

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &RSA_PKCS1_SHA256,
            &SystemRandom::new(),
            signing_input.as_bytes(),
            &mut signature,
        )
        .map_err(|_| AuthError::Token("failed to sign assertion".to_string()))?;

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Load an RSA key from a PKCS#8 PEM block.
fn load_signing_key(pem: &str) -> Result<RsaKeyPair, AuthError> {
    let mut reader = pem.as_bytes();
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(der))) => {
                return RsaKeyPair::from_pkcs8(der.secret_pkcs8_der()).map_err(|e| {
                    AuthError::MalformedCredential(format!("private_key rejected: {}", e))
                });
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Err(AuthError::MalformedCredential(
                    "private_key holds no PKCS#8 key".to_string(),
                ))
            }
            Err(e) => {
                return Err(AuthError::MalformedCredential(format!(
                    "private_key is not valid PEM: {}",
                    e
                )))
            }
        }
    }
}

/// Exchanges service-account keys at the key's token endpoint.
pub struct GoogleIdTokenSource {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl GoogleIdTokenSource {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(15),
        }
    }
}

#[async_trait]
impl IdTokenSource for GoogleIdTokenSource {
    async fn id_token(&self, key: &ServiceAccountKey, audience: &str) -> Result<String, AuthError> {
        let token_url = Url::parse(&key.token_uri)
            .map_err(|e| AuthError::MalformedCredential(format!("invalid token_uri: {}", e)))?;

        let assertion = sign_assertion(key, audience, chrono::Utc::now().timestamp())?;
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        let request = TransportRequest::post(token_url, body.into(), self.timeout)
            .with_header("Content-Type", "application/x-www-form-urlencoded");

        let response = self
            .transport
            .post(request)
            .await
            .map_err(|e| AuthError::Token(e.to_string()))?;

        if response.status != 200 {
            return Err(AuthError::Token(format!(
                "token endpoint answered {}: {}",
                response.status,
                response.body_text()
            )));
        }

        let parsed: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| AuthError::Token(format!("invalid token response: {}", e)))?;

        parsed
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Token("token response has no id_token".to_string()))
    }
}
