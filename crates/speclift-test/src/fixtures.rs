//! Shared fixtures and throwaway workspaces.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Absolute path to the shared test fixtures directory.
pub fn fixtures() -> PathBuf {
    // CARGO_MANIFEST_DIR = .../crates/speclift-test
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("crates/")
        .parent()
        .expect("workspace root")
        .join("tests/fixtures")
}

/// The fixture service account, with `token_uri` pointed at `token_url`.
pub fn service_account_for(token_url: &str) -> String {
    let raw = std::fs::read_to_string(fixtures().join("service-account.json"))
        .expect("service-account.json fixture");
    let mut json: serde_json::Value = serde_json::from_str(&raw).expect("fixture is JSON");
    json["token_uri"] = serde_json::Value::String(token_url.to_string());
    json.to_string()
}

/// A temporary CI workspace.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp workspace"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let target = self.dir.path().join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dir");
        }
        std::fs::write(&target, contents).expect("write fixture");
        target
    }

    /// Copy a file from the shared fixtures directory.
    pub fn copy_fixture(&self, fixture: &str, relative: &str) -> PathBuf {
        let contents =
            std::fs::read_to_string(fixtures().join(fixture)).expect("fixture exists");
        self.write(relative, &contents)
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}
