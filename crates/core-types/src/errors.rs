use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a permission denial was about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    Operation,
    Field,
    Filter,
    Order,
    RowScope,
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DenialKind::Operation => "operation",
            DenialKind::Field => "field",
            DenialKind::Filter => "filter",
            DenialKind::Order => "order",
            DenialKind::RowScope => "row scope",
        };
        f.write_str(label)
    }
}

/// Status signal preserved by host transports. Never parsed out of message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    PermissionDenied,
    RelationDepthExceeded,
    RateLimited,
    NotFound,
    Internal,
}

/// Error taxonomy shared by every flexquery crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlexError {
    #[error("invalid query: {0}")]
    Validation(String),
    #[error("access denied: {kind} '{subject}' not allowed")]
    PermissionDenied { kind: DenialKind, subject: String },
    #[error("path '{path}' exceeds max relation depth of {limit}")]
    RelationDepthExceeded { path: String, limit: usize },
    #[error("rate limit exceeded, retry after {}s", ceil_secs(.retry_after))]
    RateLimited { retry_after: Duration },
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type FlexResult<T> = Result<T, FlexError>;

impl FlexError {
    pub fn validation(message: impl Into<String>) -> Self {
        FlexError::Validation(message.into())
    }

    pub fn denied(kind: DenialKind, subject: impl Into<String>) -> Self {
        FlexError::PermissionDenied {
            kind,
            subject: subject.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        FlexError::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FlexError::Validation(_) => ErrorKind::Validation,
            FlexError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            FlexError::RelationDepthExceeded { .. } => ErrorKind::RelationDepthExceeded,
            FlexError::RateLimited { .. } => ErrorKind::RateLimited,
            FlexError::NotFound => ErrorKind::NotFound,
            FlexError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status a transport should use for this error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::RelationDepthExceeded => 400,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::Internal => 500,
        }
    }

    /// Only rate limiting is safe to retry, and only after the hint elapses.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlexError::RateLimited { .. })
    }

    /// Whole seconds a client should wait, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            FlexError::RateLimited { retry_after } => Some(ceil_secs(retry_after)),
            _ => None,
        }
    }

    /// Message safe to show a caller. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            FlexError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

fn ceil_secs(duration: &Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl From<serde_json::Error> for FlexError {
    fn from(err: serde_json::Error) -> Self {
        FlexError::Validation(format!("malformed json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_message_names_subject() {
        let err = FlexError::denied(DenialKind::Filter, "status.in");
        assert_eq!(err.to_string(), "access denied: filter 'status.in' not allowed");
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn retry_after_rounds_up() {
        let err = FlexError::RateLimited {
            retry_after: Duration::from_millis(1_200),
        };
        assert_eq!(err.retry_after_secs(), Some(2));
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = FlexError::internal("store connection reset");
        assert_eq!(err.public_message(), "internal error");
        assert!(!err.is_retryable());
    }
}
