//! YAML to JSON normalization of spec files.
//!
//! The registry only indexes JSON. YAML specs are converted into a sibling
//! `.json` file; everything else is passed through untouched.

use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value as Json};
use serde_yaml::Value as Yaml;
use speclift_telemetry::log_spec_normalized;

use crate::error::NormalizationError;
use crate::resolver::ResolvedSpec;

/// A spec file whose content is JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSpec {
    /// The file the resolver selected.
    pub source: ResolvedSpec,
    /// The file to upload.
    pub path: PathBuf,
    /// True when `path` was written by the normalizer.
    pub converted: bool,
}

/// Converts YAML specs to JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatNormalizer;

impl FormatNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one spec. Non-YAML files are returned as-is without reading them.
    pub fn normalize(&self, spec: &ResolvedSpec) -> Result<NormalizedSpec, NormalizationError> {
        let path = spec.path();
        if !is_yaml(path) {
            return Ok(NormalizedSpec {
                source: spec.clone(),
                path: path.to_path_buf(),
                converted: false,
            });
        }

        let raw = std::fs::read(path).map_err(|source| NormalizationError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let json = yaml_to_json(&raw, path)?;
        let out = serde_json::to_vec(&json).map_err(|e| NormalizationError::Unrepresentable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let out_path = path.with_extension("json");
        std::fs::write(&out_path, out).map_err(|source| NormalizationError::Write {
            path: out_path.clone(),
            source,
        })?;

        log_spec_normalized!(
            spec = %path.display(),
            output = %out_path.display(),
            "Converted YAML spec to JSON"
        );

        Ok(NormalizedSpec {
            source: spec.clone(),
            path: out_path,
            converted: true,
        })
    }
}

/// Whether the path has a `.yaml` or `.yml` extension.
pub fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Parse YAML bytes into the equivalent JSON structure.
pub fn yaml_to_json(raw: &[u8], path: &Path) -> Result<Json, NormalizationError> {
    let parse_error = |source| NormalizationError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let mut doc: Yaml = serde_yaml::from_slice(raw).map_err(parse_error)?;
    // `<<: *anchor` merge keys are expanded like any YAML 1.1 loader would.
    doc.apply_merge().map_err(parse_error)?;

    convert(doc).map_err(|reason| NormalizationError::Unrepresentable {
        path: path.to_path_buf(),
        reason,
    })
}

fn convert(value: Yaml) -> Result<Json, String> {
    Ok(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => Json::Number(convert_number(&n)?),
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(
            items
                .into_iter()
                .map(convert)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut object = Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = convert_key(key)?;
                if object.contains_key(&key) {
                    return Err(format!("duplicate key '{}' after converting keys to strings", key));
                }
                object.insert(key, convert(value)?);
            }
            Json::Object(object)
        }
        Yaml::Tagged(tagged) => convert(tagged.value)?,
    })
}

fn convert_number(n: &serde_yaml::Number) -> Result<Number, String> {
    if let Some(i) = n.as_i64() {
        Ok(Number::from(i))
    } else if let Some(u) = n.as_u64() {
        Ok(Number::from(u))
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .ok_or_else(|| format!("number {} is not finite", n))
    }
}

// JSON keys are strings. Scalar YAML keys (e.g. `200:` response codes) keep
// their textual form.
fn convert_key(key: Yaml) -> Result<String, String> {
    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => convert_key(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => {
            Err("mapping keys must be scalars to convert to JSON".to_string())
        }
    }
}
