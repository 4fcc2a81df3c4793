use serde_json::Value;

use crate::errors::PolicyError;
use crate::model::{PolicyDocument, SettingSource};

/// Applies one dotted setting path to the document and records where it came from.
pub(crate) fn apply_setting(
    document: &mut PolicyDocument,
    path: &str,
    value: &Value,
    source: SettingSource,
) -> Result<(), PolicyError> {
    let settings = &mut document.settings;
    match path {
        "pagination.default_limit" => {
            settings.pagination.default_limit = to_u32(path, value)?;
        }
        "pagination.max_limit" => {
            settings.pagination.max_limit = to_u32(path, value)?;
        }
        "security.max_relation_depth" => {
            settings.security.max_relation_depth = to_usize(path, value)?;
        }
        "security.trust_forwarded_for" => {
            settings.security.trust_forwarded_for = to_bool(path, value)?;
        }
        "rate_limit" => {
            settings.rate_limit = if value.is_null() {
                None
            } else {
                Some(to_u32(path, value)?)
            };
        }
        "audit_queries" => {
            settings.audit_queries = to_bool(path, value)?;
        }
        "always_http_200" => {
            settings.always_http_200 = to_bool(path, value)?;
        }
        path => return Err(PolicyError::UnsupportedPath(path.to_string())),
    }
    document.set_provenance(path, source);
    Ok(())
}

fn to_u32(path: &str, value: &Value) -> Result<u32, PolicyError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            PolicyError::InvalidValue(format!("{path}: expected unsigned integer, got {value}"))
        })
}

fn to_usize(path: &str, value: &Value) -> Result<usize, PolicyError> {
    value
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| {
            PolicyError::InvalidValue(format!("{path}: expected unsigned integer, got {value}"))
        })
}

fn to_bool(path: &str, value: &Value) -> Result<bool, PolicyError> {
    value
        .as_bool()
        .ok_or_else(|| PolicyError::InvalidValue(format!("{path}: expected bool, got {value}")))
}
