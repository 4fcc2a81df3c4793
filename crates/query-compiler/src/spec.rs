//! Caller-supplied query specification.

use flexquery_core_types::{FlexError, FlexResult, OperationKind};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    Csv(String),
    List(Vec<String>),
}

fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<ListOrCsv>::deserialize(deserializer)?;
    let items = match raw {
        None => Vec::new(),
        Some(ListOrCsv::Csv(joined)) => joined.split(',').map(str::to_string).collect(),
        Some(ListOrCsv::List(items)) => items,
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrText {
    Int(i64),
    Text(String),
}

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IntOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrText::Int(value)) => Ok(Some(value)),
        Some(IntOrText::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(IntOrText::Text(text)) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got '{text}'"))),
    }
}

/// Field selection, filters, ordering and paging for one request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default, deserialize_with = "list_or_csv", skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub filters: Value,
    #[serde(
        default,
        alias = "order",
        deserialize_with = "list_or_csv",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub order_by: Vec<String>,
    #[serde(default, deserialize_with = "lenient_int", skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int", skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl QuerySpec {
    pub fn from_json(raw: &str) -> FlexResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Requested patterns, `*` when nothing was asked for.
    pub fn field_patterns(&self) -> Vec<String> {
        if self.fields.is_empty() {
            vec!["*".to_string()]
        } else {
            self.fields.clone()
        }
    }
}

/// A full request: the operation, its target and the query specification.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(
        default,
        alias = "action",
        alias = "_action",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub spec: QuerySpec,
}

impl QueryRequest {
    pub fn list(spec: QuerySpec) -> Self {
        Self {
            operation: Some(OperationKind::List.as_str().to_string()),
            spec,
            ..Self::default()
        }
    }

    pub fn get(id: impl Into<Value>) -> Self {
        Self {
            operation: Some(OperationKind::Get.as_str().to_string()),
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn create(data: Map<String, Value>) -> Self {
        Self {
            operation: Some(OperationKind::Create.as_str().to_string()),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn update(id: impl Into<Value>, data: Map<String, Value>) -> Self {
        Self {
            operation: Some(OperationKind::Update.as_str().to_string()),
            id: Some(id.into()),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn delete(id: impl Into<Value>) -> Self {
        Self {
            operation: Some(OperationKind::Delete.as_str().to_string()),
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_spec(mut self, spec: QuerySpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn from_json(raw: &str) -> FlexResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Explicit operation, else `get` when an id is present, else `list`.
    pub fn operation(&self) -> FlexResult<OperationKind> {
        match self.operation.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw.parse(),
            _ if self.id.as_ref().is_some_and(|id| !id.is_null()) => Ok(OperationKind::Get),
            _ => Ok(OperationKind::List),
        }
    }

    /// The row id, required for operations that target one row.
    pub fn target_id(&self, operation: OperationKind) -> FlexResult<Option<Value>> {
        match (&self.id, operation.targets_row()) {
            (Some(id), true) if is_usable_id(id) => Ok(Some(id.clone())),
            (_, true) => Err(FlexError::validation(format!(
                "{operation} requires a scalar id"
            ))),
            (_, false) => Ok(None),
        }
    }
}

fn is_usable_id(id: &Value) -> bool {
    match id {
        Value::Number(_) => true,
        Value::String(s) => !s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn fields_accept_csv_or_list() {
        let spec: QuerySpec =
            serde_json::from_value(json!({"fields": "id, title,author.name,", "order_by": "-id"}))
                .unwrap();
        assert_eq!(spec.fields, vec!["id", "title", "author.name"]);
        assert_eq!(spec.order_by, vec!["-id"]);

        let spec: QuerySpec =
            serde_json::from_value(json!({"fields": ["id"], "order_by": ["-id", "title"]})).unwrap();
        assert_eq!(spec.fields, vec!["id"]);
        assert_eq!(spec.order_by, vec!["-id", "title"]);
    }

    #[test]
    fn missing_fields_default_to_wildcard() {
        let spec = QuerySpec::default();
        assert_eq!(spec.field_patterns(), vec!["*"]);
    }

    #[test]
    fn limits_accept_numeric_strings() {
        let spec: QuerySpec = serde_json::from_value(json!({"limit": "25", "offset": 10})).unwrap();
        assert_eq!(spec.limit, Some(25));
        assert_eq!(spec.offset, Some(10));
        assert!(serde_json::from_value::<QuerySpec>(json!({"limit": "ten"})).is_err());
    }

    #[test]
    fn operation_is_inferred_from_id() {
        let request = QueryRequest::from_json(r#"{"id": 5, "fields": "title"}"#).unwrap();
        assert_eq!(request.operation().unwrap(), OperationKind::Get);
        assert_eq!(request.spec.fields, vec!["title"]);

        let request = QueryRequest::from_json(r#"{"filters": {"status": "draft"}}"#).unwrap();
        assert_eq!(request.operation().unwrap(), OperationKind::List);

        let request = QueryRequest::from_json(r#"{"action": "add", "data": {"title": "x"}}"#)
            .unwrap();
        assert_eq!(request.operation().unwrap(), OperationKind::Create);

        let request = QueryRequest::from_json(r#"{"_action": "purge"}"#).unwrap();
        assert!(request.operation().is_err());
    }

    #[test]
    fn row_operations_need_an_id() {
        let request = QueryRequest::from_json(r#"{"operation": "delete"}"#).unwrap();
        assert!(request.target_id(OperationKind::Delete).is_err());
        let request = QueryRequest::delete("a-1");
        assert_eq!(
            request.target_id(OperationKind::Delete).unwrap(),
            Some(json!("a-1"))
        );
        assert_eq!(request.target_id(OperationKind::List).unwrap(), None);
    }
}
