//! The fully-resolved input of a publish run.

use std::fmt;

use crate::error::ConfigError;

/// A service-account key blob, kept opaque until the token strategy parses it.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceCredential(String);

impl ServiceCredential {
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceCredential(<redacted>)")
    }
}

/// Everything the pipeline needs for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Paths, glob patterns or directories, relative to the workspace root.
    pub spec_locations: Vec<String>,
    pub team: String,
    pub endpoint_url: String,
    pub api_key: Option<String>,
    pub service_credential: Option<ServiceCredential>,
}

impl PublishRequest {
    pub fn new(
        spec_locations: Vec<String>,
        team: impl Into<String>,
        endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            spec_locations,
            team: team.into(),
            endpoint_url: endpoint_url.into(),
            api_key: None,
            service_credential: None,
        }
    }

    /// Set the API key. Surrounding whitespace is dropped, and a blank key
    /// counts as no key.
    pub fn with_api_key(mut self, key: impl AsRef<str>) -> Self {
        let key = key.as_ref().trim();
        self.api_key = (!key.is_empty()).then(|| key.to_string());
        self
    }

    pub fn with_service_credential(mut self, credential: ServiceCredential) -> Self {
        self.service_credential = (!credential.is_empty()).then_some(credential);
        self
    }

    /// The API key, if one is usable.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// The service credential, if one is usable.
    pub fn service_credential(&self) -> Option<&ServiceCredential> {
        self.service_credential.as_ref().filter(|c| !c.is_empty())
    }

    /// Check the request before any I/O happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key().is_none() && self.service_credential().is_none() {
            return Err(ConfigError::MissingCredentials);
        }
        if !self.spec_locations.iter().any(|l| !l.trim().is_empty()) {
            return Err(ConfigError::MissingSpec);
        }
        if self.team.trim().is_empty() {
            return Err(ConfigError::MissingTeam);
        }
        if self.endpoint_url.trim().is_empty() {
            return Err(ConfigError::MissingUploaderUrl);
        }

        let url = reqwest::Url::parse(self.endpoint_url.trim())
            .map_err(|e| ConfigError::InvalidUploaderUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUploaderUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PublishRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishRequest")
            .field("spec_locations", &self.spec_locations)
            .field("team", &self.team)
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("service_credential", &self.service_credential)
            .finish()
    }
}
