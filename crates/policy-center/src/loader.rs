use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::errors::PolicyError;
use crate::grants::PolicyConfig;
use crate::model::{PolicyDocument, SettingSource};
use crate::overlay::apply_setting;

const ENV_PREFIX: &str = "FLEXQUERY__";
const ENV_JSON: &str = "FLEXQUERY_OVERRIDE_JSON";

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
        }
    }
}

/// Defaults, then the file, then `FLEXQUERY__*` and `FLEXQUERY_OVERRIDE_JSON`.
pub fn load_document(path: Option<&Path>) -> Result<PolicyDocument, PolicyError> {
    let mut options = LoadOptions::default();
    if let Some(p) = path {
        options.paths.push(p.to_path_buf());
    }
    options.include_env = true;
    load_document_with_options(&options)
}

pub fn load_document_with_options(options: &LoadOptions) -> Result<PolicyDocument, PolicyError> {
    let mut document = PolicyDocument::default();
    bootstrap_builtin_provenance(&mut document)?;

    for path in &options.paths {
        let content = fs::read_to_string(path)
            .map_err(|err| PolicyError::Io(format!("{}: {}", path.display(), err)))?;
        merge_file(&mut document, &content)?;
        debug!(path = %path.display(), "merged policy file");
    }

    if options.include_env {
        for overlay in overlays_from_env()? {
            apply_setting(&mut document, &overlay.path, &overlay.value, overlay.source)?;
        }
    }

    info!(
        entities = document.entities.len(),
        max_limit = document.settings.pagination.max_limit,
        max_relation_depth = document.settings.security.max_relation_depth,
        "policy document loaded"
    );
    Ok(document)
}

/// Parses a single policy document without consulting the environment.
pub fn parse_document(content: &str) -> Result<PolicyDocument, PolicyError> {
    let mut document = PolicyDocument::default();
    bootstrap_builtin_provenance(&mut document)?;
    merge_file(&mut document, content)?;
    Ok(document)
}

struct SettingOverlay {
    path: String,
    value: Value,
    source: SettingSource,
}

fn parse_structured(content: &str) -> Result<Value, PolicyError> {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str::<Value>(content).map_err(|yaml_err| {
            PolicyError::Invalid(format!(
                "neither json ({json_err}) nor yaml ({yaml_err})"
            ))
        }),
    }
}

fn merge_file(document: &mut PolicyDocument, content: &str) -> Result<(), PolicyError> {
    let value = parse_structured(content)?;
    let mut root = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(()),
        other => {
            return Err(PolicyError::Invalid(format!(
                "policy document must be a mapping, got {other}"
            )))
        }
    };

    if let Some(settings) = root.remove("settings") {
        for overlay in flatten_value(settings, None, SettingSource::File) {
            apply_setting(document, &overlay.path, &overlay.value, overlay.source)?;
        }
    }

    if let Some(entities) = root.remove("entities") {
        if !entities.is_null() {
            let parsed: BTreeMap<String, PolicyConfig> = serde_json::from_value(entities)
                .map_err(|err| PolicyError::Invalid(format!("entities: {err}")))?;
            document.entities.extend(parsed);
        }
    }

    if let Some(unknown) = root.keys().next() {
        return Err(PolicyError::Invalid(format!(
            "unknown top-level key '{unknown}'"
        )));
    }
    Ok(())
}

fn overlays_from_env() -> Result<Vec<SettingOverlay>, PolicyError> {
    let mut overlays = Vec::new();
    for (key, raw) in env::vars() {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let path = stripped
                .split("__")
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(".");
            if path.is_empty() {
                continue;
            }
            let value = parse_env_value(&raw);
            overlays.push(SettingOverlay {
                path,
                value,
                source: SettingSource::Env,
            });
        }
    }

    if let Ok(raw_json) = env::var(ENV_JSON) {
        if !raw_json.trim().is_empty() {
            let json_value: Value = serde_json::from_str(&raw_json)
                .map_err(|err| PolicyError::Invalid(format!("{ENV_JSON}: {err}")))?;
            overlays.extend(flatten_value(json_value, None, SettingSource::Env));
        }
    }

    Ok(overlays)
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    if let Ok(boolean) = raw.parse::<bool>() {
        return Value::Bool(boolean);
    }
    Value::String(raw.to_string())
}

fn flatten_value(value: Value, prefix: Option<String>, source: SettingSource) -> Vec<SettingOverlay> {
    match value {
        Value::Object(map) => {
            let mut result = Vec::new();
            for (key, value) in map {
                let key_segment = key.trim().to_ascii_lowercase();
                let next_prefix = match &prefix {
                    Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, key_segment),
                    _ => key_segment,
                };
                result.extend(flatten_value(value, Some(next_prefix), source));
            }
            result
        }
        other => match prefix {
            Some(path) => vec![SettingOverlay {
                path,
                value: other,
                source,
            }],
            None => Vec::new(),
        },
    }
}

fn bootstrap_builtin_provenance(document: &mut PolicyDocument) -> Result<(), PolicyError> {
    let value = serde_json::to_value(&document.settings)
        .map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
    for overlay in flatten_value(value, None, SettingSource::Builtin) {
        document.set_provenance(&overlay.path, overlay.source);
    }
    Ok(())
}
