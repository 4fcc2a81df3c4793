use flexquery_core_types::FlexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid policy: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("unsupported setting path: {0}")]
    UnsupportedPath(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("policy references unknown entity '{0}'")]
    UnknownEntity(String),
}

impl From<PolicyError> for FlexError {
    fn from(value: PolicyError) -> Self {
        FlexError::internal(value.to_string())
    }
}
