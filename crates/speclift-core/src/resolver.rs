//! Expands spec locations into concrete files.
//!
//! A location is a literal path, a glob pattern, or a directory whose direct
//! children are all publish candidates. Paths are relative to the workspace
//! root unless absolute.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use speclift_telemetry::log_spec_resolved;

use crate::error::ResolutionError;
use crate::normalize::is_yaml;

/// A concrete spec file selected for publishing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedSpec(PathBuf);

impl ResolvedSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn into_path(self) -> PathBuf {
        self.0
    }
}

impl fmt::Display for ResolvedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Result of resolving several locations. Errors are per location.
#[derive(Debug, Default)]
pub struct Resolution {
    pub specs: Vec<ResolvedSpec>,
    pub errors: Vec<ResolutionError>,
}

impl Resolution {
    /// Fail on the first location error, otherwise return the specs.
    pub fn into_result(self) -> Result<Vec<ResolvedSpec>, ResolutionError> {
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(self.specs),
        }
    }
}

/// Turns spec locations into files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecResolver;

impl SpecResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every location independently and concatenate the results.
    ///
    /// The same file reached through several locations is kept once, at its
    /// first position. Two files that would upload under the same JSON name
    /// (`api.yml` next to `api.yaml` or `api.json`) keep the first and report
    /// the second as a collision.
    pub fn resolve<S: AsRef<str>>(&self, locations: &[S], workspace_root: &Path) -> Resolution {
        let mut resolution = Resolution::default();
        let mut seen = HashSet::new();
        let mut targets: HashMap<PathBuf, PathBuf> = HashMap::new();

        for location in locations {
            let location = location.as_ref().trim();
            if location.is_empty() {
                continue;
            }
            match self.resolve_location(location, workspace_root) {
                Ok(specs) => {
                    log_spec_resolved!(location = %location, count = specs.len(), "Resolved spec location");
                    for spec in specs {
                        if !seen.insert(spec.clone()) {
                            continue;
                        }
                        let target = upload_target(spec.path());
                        if let Some(claimed_by) = targets.get(&target) {
                            resolution.errors.push(ResolutionError::Collision {
                                path: spec.into_path(),
                                target,
                                claimed_by: claimed_by.clone(),
                            });
                            continue;
                        }
                        targets.insert(target, spec.path().to_path_buf());
                        resolution.specs.push(spec);
                    }
                }
                Err(e) => resolution.errors.push(e),
            }
        }

        resolution
    }

    /// Resolve a single location.
    pub fn resolve_location(
        &self,
        location: &str,
        workspace_root: &Path,
    ) -> Result<Vec<ResolvedSpec>, ResolutionError> {
        let joined = workspace_root.join(location);

        if joined.is_dir() {
            return list_directory(&joined);
        }

        // The root is literal; only the location may carry wildcards.
        let pattern = if Path::new(location).is_absolute() {
            location.to_string()
        } else {
            let root = glob::Pattern::escape(&workspace_root.to_string_lossy());
            Path::new(&root).join(location).to_string_lossy().into_owned()
        };
        let paths = glob::glob(&pattern).map_err(|e| ResolutionError::Pattern {
            location: location.to_string(),
            message: e.to_string(),
        })?;

        let mut specs = Vec::new();
        for entry in paths {
            // Unreadable entries are skipped, like a shell glob would.
            let Ok(path) = entry else { continue };
            if path.is_dir() {
                specs.extend(list_directory(&path)?);
            } else {
                specs.push(ResolvedSpec::new(path));
            }
        }

        if specs.is_empty() {
            // No match: keep the literal so a typo surfaces as a failed upload.
            specs.push(ResolvedSpec::new(joined));
        }
        Ok(specs)
    }
}

/// The file actually sent for `path`: YAML is uploaded through its `.json`
/// sibling.
fn upload_target(path: &Path) -> PathBuf {
    if is_yaml(path) {
        path.with_extension("json")
    } else {
        path.to_path_buf()
    }
}

fn list_directory(dir: &Path) -> Result<Vec<ResolvedSpec>, ResolutionError> {
    let to_err = |source| ResolutionError::Directory {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(to_err)? {
        let entry = entry.map_err(to_err)?;
        let path = entry.path();
        if path.is_file() {
            files.push(ResolvedSpec::new(path));
        }
    }
    files.sort();
    Ok(files)
}
