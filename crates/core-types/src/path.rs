use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::FlexError;

/// Upper bound on dotted segments in any path, relation hops and document keys included.
pub const MAX_PATH_SEGMENTS: usize = 16;

/// A dotted sequence of relation, field or document-key segments.
///
/// The path itself carries no classification; the query compiler decides
/// which segments are relation hops once it consults the schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, FlexError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FlexError::validation("empty field path"));
        }
        let segments = trimmed
            .split('.')
            .map(|segment| segment.to_string())
            .collect::<Vec<_>>();
        Self::from_segments(segments).map_err(|err| match err {
            FlexError::Validation(reason) => {
                FlexError::validation(format!("invalid field path '{trimmed}': {reason}"))
            }
            other => other,
        })
    }

    pub fn from_segments(segments: Vec<String>) -> Result<Self, FlexError> {
        if segments.is_empty() {
            return Err(FlexError::validation("empty field path"));
        }
        if segments.len() > MAX_PATH_SEGMENTS {
            return Err(FlexError::validation(format!(
                "more than {MAX_PATH_SEGMENTS} segments"
            )));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    pub fn last(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Prefix made of the first `len` segments, if non-empty.
    pub fn prefix(&self, len: usize) -> Option<FieldPath> {
        if len == 0 || len > self.segments.len() {
            return None;
        }
        Some(Self {
            segments: self.segments[..len].to_vec(),
        })
    }

    pub fn child(&self, segment: &str) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Segments joined with a store-specific separator, e.g. `author__name`.
    pub fn join(&self, separator: &str) -> String {
        self.segments.join(separator)
    }
}

fn validate_segment(segment: &str) -> Result<(), FlexError> {
    if segment.is_empty() {
        return Err(FlexError::validation("empty segment"));
    }
    if segment.contains('*') {
        return Err(FlexError::validation("wildcards are not allowed here"));
    }
    if segment.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(FlexError::validation(format!(
            "segment '{segment}' contains whitespace"
        )));
    }
    Ok(())
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = FlexError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(raw)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = FlexError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_paths() {
        let path = FieldPath::parse("author.company.name").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first(), "author");
        assert_eq!(path.last(), "name");
        assert_eq!(path.join("__"), "author__company__name");
        assert_eq!(path.prefix(2).unwrap().to_string(), "author.company");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("author..name").is_err());
        assert!(FieldPath::parse("author.*").is_err());
        assert!(FieldPath::parse("na me").is_err());
        let long = vec!["a"; MAX_PATH_SEGMENTS + 1].join(".");
        assert!(FieldPath::parse(&long).is_err());
    }

    #[test]
    fn serializes_as_dotted_string() {
        let path = FieldPath::parse("metadata.settings.theme").unwrap();
        let encoded = serde_json::to_string(&path).unwrap();
        assert_eq!(encoded, "\"metadata.settings.theme\"");
        let decoded: FieldPath = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, path);
    }
}
