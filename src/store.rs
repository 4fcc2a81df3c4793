//! Contract between authorized plans and whatever actually holds the rows.

use std::collections::BTreeSet;

use async_trait::async_trait;
use flexquery_core_types::FlexError;
use flexquery_query_compiler::{OrderTerm, Predicate};
use serde_json::{Map, Value};
use thiserror::Error;

pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Detail stays in logs; callers only ever see a generic internal error.
impl From<StoreError> for FlexError {
    fn from(err: StoreError) -> Self {
        FlexError::internal(err.to_string())
    }
}

/// Primary keys compare by their text form, so `7` and `"7"` name the same row.
pub fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One read against the store, already authorized.
#[derive(Clone, Copy, Debug)]
pub struct StoreQuery<'a> {
    pub entity: &'a str,
    /// Row scope AND caller filters.
    pub predicate: &'a Predicate,
    pub ordering: &'a [OrderTerm],
    /// Restricts the read to one primary key.
    pub id: Option<&'a Value>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Relation paths to hydrate in place of their foreign keys.
    pub relations: &'a BTreeSet<String>,
}

/// Storage behind [`crate::FlexQuery`].
///
/// Rows come back with requested relations hydrated as nested objects and
/// every other relation left as its raw foreign key.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn fetch(&self, query: StoreQuery<'_>) -> Result<Vec<Row>, StoreError>;

    /// Total matching rows, when the backend can count cheaply.
    async fn count(&self, _entity: &str, _predicate: &Predicate) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }

    async fn insert(&self, entity: &str, data: Row) -> Result<Row, StoreError>;

    /// `None` when no row with `id` satisfies `predicate`.
    async fn update(
        &self,
        entity: &str,
        predicate: &Predicate,
        id: &Value,
        data: Row,
    ) -> Result<Option<Row>, StoreError>;

    /// `false` when no row with `id` satisfies `predicate`.
    async fn delete(&self, entity: &str, predicate: &Predicate, id: &Value)
        -> Result<bool, StoreError>;
}
