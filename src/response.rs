//! Transport-neutral response payloads.

use flexquery_core_types::{ErrorKind, FlexError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    OkQuery,
    Created,
    LimitClamped,
    BadRequest,
    PermissionDenied,
    NotFound,
    RateLimited,
    InternalError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::OkQuery => "OK_QUERY",
            ResponseCode::Created => "CREATED",
            ResponseCode::LimitClamped => "LIMIT_CLAMPED",
            ResponseCode::BadRequest => "BAD_REQUEST",
            ResponseCode::PermissionDenied => "PERMISSION_DENIED",
            ResponseCode::NotFound => "NOT_FOUND",
            ResponseCode::RateLimited => "RATE_LIMITED",
            ResponseCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ResponseCode::Ok | ResponseCode::OkQuery | ResponseCode::LimitClamped => 200,
            ResponseCode::Created => 201,
            ResponseCode::BadRequest => 400,
            ResponseCode::PermissionDenied => 403,
            ResponseCode::NotFound => 404,
            ResponseCode::RateLimited => 429,
            ResponseCode::InternalError => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ResponseCode::Ok
                | ResponseCode::OkQuery
                | ResponseCode::Created
                | ResponseCode::LimitClamped
        )
    }

    /// Success carrying a warning the caller should see.
    pub fn is_warning(&self) -> bool {
        matches!(self, ResponseCode::LimitClamped)
    }

    pub fn message(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "Success",
            ResponseCode::OkQuery => "Query successful",
            ResponseCode::Created => "Created successfully",
            ResponseCode::LimitClamped => "Limit was clamped to maximum allowed",
            ResponseCode::BadRequest => "Bad request",
            ResponseCode::PermissionDenied => "Permission denied",
            ResponseCode::NotFound => "Not found",
            ResponseCode::RateLimited => "Rate limit exceeded",
            ResponseCode::InternalError => "Internal server error",
        }
    }
}

impl From<ErrorKind> for ResponseCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation | ErrorKind::RelationDepthExceeded => ResponseCode::BadRequest,
            ErrorKind::PermissionDenied => ResponseCode::PermissionDenied,
            ErrorKind::RateLimited => ResponseCode::RateLimited,
            ErrorKind::NotFound => ResponseCode::NotFound,
            ErrorKind::Internal => ResponseCode::InternalError,
        }
    }
}

/// A response code, its payload and, for failures, the caller-safe message.
#[derive(Clone, Debug, PartialEq)]
pub struct FlexResponse {
    code: ResponseCode,
    error_kind: Option<ErrorKind>,
    error: Option<String>,
    data: Map<String, Value>,
}

impl FlexResponse {
    pub fn new(code: ResponseCode, data: Map<String, Value>) -> Self {
        Self {
            code,
            error_kind: None,
            error: None,
            data,
        }
    }

    pub fn ok(data: Map<String, Value>) -> Self {
        Self::new(ResponseCode::Ok, data)
    }

    pub fn created(data: Map<String, Value>) -> Self {
        Self::new(ResponseCode::Created, data)
    }

    /// A list page, flagged when the requested limit was clamped.
    pub fn query(results: Map<String, Value>, pagination: Value, requested_limit: Option<u64>) -> Self {
        let mut data = Map::new();
        data.insert("results".into(), Value::Object(results));
        data.insert("pagination".into(), pagination);
        match requested_limit {
            Some(requested) => {
                data.insert("requested_limit".into(), Value::from(requested));
                Self::new(ResponseCode::LimitClamped, data)
            }
            None => Self::new(ResponseCode::OkQuery, data),
        }
    }

    pub fn from_error(err: &FlexError) -> Self {
        let mut data = Map::new();
        if let Some(secs) = err.retry_after_secs() {
            data.insert("retry_after".into(), Value::from(secs));
        }
        Self {
            code: ResponseCode::from(err.kind()),
            error_kind: Some(err.kind()),
            error: Some(err.public_message()),
            data,
        }
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    /// The error kind behind a failure, for transports that map it to a status.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn retry_after(&self) -> Option<u64> {
        self.data.get("retry_after").and_then(Value::as_u64)
    }

    /// Status the transport should send.
    pub fn http_status(&self, always_http_200: bool) -> u16 {
        if always_http_200 {
            200
        } else {
            self.code.http_status()
        }
    }

    /// Payload body. With `always_http_200` the real status travels inside it.
    pub fn to_value(&self, always_http_200: bool) -> Value {
        let mut body = Map::new();
        if always_http_200 {
            body.insert("status_code".into(), Value::from(self.code.http_status()));
            body.insert("success".into(), Value::Bool(self.is_success()));
            if !self.is_success() {
                let message = self
                    .error
                    .clone()
                    .unwrap_or_else(|| self.code.message().to_string());
                body.insert("error".into(), Value::String(message));
            }
            if self.code.is_warning() {
                body.insert("warning".into(), Value::String(self.code.message().into()));
            }
        } else {
            if self.code.is_warning() {
                body.insert("warning".into(), Value::Bool(true));
                body.insert("warning_code".into(), Value::String(self.code.as_str().into()));
            }
            if let Some(error) = &self.error {
                body.insert("error".into(), Value::String(error.clone()));
            }
        }
        for (key, value) in &self.data {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

impl From<FlexError> for FlexResponse {
    fn from(err: FlexError) -> Self {
        FlexResponse::from_error(&err)
    }
}
