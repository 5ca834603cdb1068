//! Plugin configuration.
//!
//! Drone hands settings to plugins in one of two ways: `PLUGIN_*`
//! environment variables, or a JSON payload on stdin for older agents.
//! Both end up as [`PluginSettings`], which is validated into a
//! [`PublishRequest`].

use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;
use speclift_core::{ConfigError, PublishRequest, ServiceCredential};

/// Raw plugin settings, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSettings {
    /// Workspace root that spec locations are relative to.
    pub workspace: Option<PathBuf>,
    pub spec: Option<String>,
    pub specs: Vec<String>,
    pub specs_dir: Option<String>,
    pub team: Option<String>,
    pub key: Option<String>,
    pub google_credentials: Option<String>,
    pub uploader_url: Option<String>,
}

/// A validated run configuration.
#[derive(Debug, Clone)]
pub struct ValidatedSettings {
    pub request: PublishRequest,
    pub workspace_root: PathBuf,
    /// The specs come from `specs_dir`.
    pub directory_mode: bool,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl PluginSettings {
    /// Spec locations from `spec` and `specs`, in that order.
    fn spec_locations(&self) -> Vec<String> {
        present(&self.spec)
            .into_iter()
            .chain(self.specs.iter().map(|s| s.trim()))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Validate into a run configuration.
    ///
    /// Checks run in a fixed order so the first complaint is stable:
    /// credentials, spec source, team, uploader url.
    pub fn validate(self, default_root: PathBuf) -> Result<ValidatedSettings, ConfigError> {
        if present(&self.key).is_none() && present(&self.google_credentials).is_none() {
            return Err(ConfigError::MissingCredentials);
        }

        let files = self.spec_locations();
        let dir = present(&self.specs_dir).map(str::to_string);
        let (locations, directory_mode) = match (files.is_empty(), dir) {
            (true, None) => return Err(ConfigError::MissingSpec),
            (false, Some(_)) => return Err(ConfigError::ConflictingSpecSources),
            (true, Some(dir)) => (vec![dir], true),
            (false, None) => (files, false),
        };

        let team = present(&self.team).ok_or(ConfigError::MissingTeam)?;
        let url = present(&self.uploader_url).ok_or(ConfigError::MissingUploaderUrl)?;

        let mut request = PublishRequest::new(locations, team, url);
        if let Some(key) = present(&self.key) {
            request = request.with_api_key(key);
        }
        if let Some(credential) = present(&self.google_credentials) {
            request = request.with_service_credential(ServiceCredential::new(credential));
        }
        request.validate()?;

        let workspace_root = self
            .workspace
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(default_root);

        Ok(ValidatedSettings {
            request,
            workspace_root,
            directory_mode,
        })
    }
}

/// Where plugin settings come from.
pub trait ConfigSource {
    fn load(self) -> Result<PluginSettings, ConfigError>;
}

/// Reads the `PLUGIN_*` variables of Drone 0.5 and later.
pub struct EnvConfigSource<F> {
    lookup: F,
}

impl EnvConfigSource<fn(&str) -> Option<String>> {
    /// Read from the process environment.
    pub fn from_process() -> Self {
        Self {
            lookup: |name| std::env::var(name).ok(),
        }
    }
}

impl<F> EnvConfigSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn first_of(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.var(name))
    }
}

impl<F> ConfigSource for EnvConfigSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn load(self) -> Result<PluginSettings, ConfigError> {
        let specs = self
            .var("PLUGIN_SPECS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(PluginSettings {
            workspace: self.var("DRONE_WORKSPACE").map(PathBuf::from),
            spec: self.var("PLUGIN_SPEC"),
            specs,
            specs_dir: self.var("PLUGIN_SPECS_DIR"),
            team: self.var("PLUGIN_TEAM"),
            key: self.first_of(&["OPENAPI_API_KEY", "PLUGIN_KEY"]),
            google_credentials: self.first_of(&["GOOGLE_CREDENTIALS", "PLUGIN_GOOGLE_CREDENTIALS"]),
            uploader_url: self.var("PLUGIN_UPLOADER_URL"),
        })
    }
}

/// Reads the JSON payload of Drone 0.4 from a reader.
pub struct StdinConfigSource<R> {
    reader: R,
}

impl<R: Read> StdinConfigSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StdinPayload {
    #[serde(default)]
    workspace: StdinWorkspace,
    #[serde(default)]
    vargs: StdinVargs,
}

#[derive(Debug, Default, Deserialize)]
struct StdinWorkspace {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StdinVargs {
    spec: Option<String>,
    #[serde(default)]
    specs: Option<OneOrMany>,
    specs_dir: Option<String>,
    team: Option<String>,
    key: Option<String>,
    google_credentials: Option<String>,
    uploader_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            // A single string may still be a comma-separated list.
            OneOrMany::One(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            OneOrMany::Many(items) => items,
        }
    }
}

impl<R: Read> ConfigSource for StdinConfigSource<R> {
    fn load(mut self) -> Result<PluginSettings, ConfigError> {
        let mut raw = String::new();
        self.reader
            .read_to_string(&mut raw)
            .map_err(|e| ConfigError::Source(format!("unable to read stdin: {}", e)))?;
        if raw.trim().is_empty() {
            return Err(ConfigError::Source("no plugin payload on stdin".to_string()));
        }

        let payload: StdinPayload = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Source(format!("invalid plugin payload: {}", e)))?;
        let vargs = payload.vargs;

        Ok(PluginSettings {
            workspace: payload.workspace.path.map(PathBuf::from),
            spec: vargs.spec,
            specs: vargs.specs.map(OneOrMany::into_vec).unwrap_or_default(),
            specs_dir: vargs.specs_dir,
            team: vargs.team,
            key: vargs.key,
            google_credentials: vargs.google_credentials,
            uploader_url: vargs.uploader_url,
        })
    }
}
