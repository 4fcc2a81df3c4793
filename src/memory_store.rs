//! Reference [`StoreAdapter`] over JSON rows held in memory.
//!
//! Relations are stored as raw foreign keys and followed on demand, both
//! when evaluating predicates and when hydrating requested relations.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use flexquery_core_types::{EntitySchema, SchemaDescriptor};
use flexquery_query_compiler::{lookup_document, Condition, Operator, OrderTerm, PathTarget, Predicate, ResolvedPath};
use regex::RegexBuilder;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::{id_text, Row, StoreAdapter, StoreError, StoreQuery};

type Tables = BTreeMap<String, Vec<Row>>;

pub struct MemoryStore {
    schema: Arc<dyn SchemaDescriptor>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(schema: Arc<dyn SchemaDescriptor>) -> Self {
        Self {
            schema,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seeds `entity` with rows, replacing whatever it held.
    pub fn with_rows(mut self, entity: &str, rows: Vec<Row>) -> Result<Self, StoreError> {
        let schema = entity_schema(self.schema.as_ref(), entity)?;
        let key = schema.name.to_ascii_lowercase();
        self.tables.get_mut().insert(key, rows);
        Ok(self)
    }

    /// Accepts `{"entity": [row, ...], ...}`.
    pub fn from_value(schema: Arc<dyn SchemaDescriptor>, value: Value) -> Result<Self, StoreError> {
        let Value::Object(entities) = value else {
            return Err(StoreError::InvalidRow(
                "data must map entity names to row lists".into(),
            ));
        };
        let mut store = Self::new(schema);
        for (entity, rows) in entities {
            let Value::Array(items) = rows else {
                return Err(StoreError::InvalidRow(format!(
                    "rows for '{entity}' must be a list"
                )));
            };
            let rows = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(StoreError::InvalidRow(format!(
                        "row for '{entity}' must be a mapping, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            store = store.with_rows(&entity, rows)?;
        }
        Ok(store)
    }

    /// Reads a JSON or YAML data file.
    pub fn load_from_path(schema: Arc<dyn SchemaDescriptor>, path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| StoreError::Backend(format!("{}: {err}", path.display())))?;
        let value = match serde_json::from_str::<Value>(&content) {
            Ok(value) => value,
            Err(_) => serde_yaml::from_str::<Value>(&content)
                .map_err(|err| StoreError::InvalidRow(format!("{}: {err}", path.display())))?,
        };
        Self::from_value(schema, value)
    }

    /// Snapshot of the stored rows, foreign keys unhydrated.
    pub async fn rows(&self, entity: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(&entity.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    fn entity(&self, name: &str) -> Result<&EntitySchema, StoreError> {
        entity_schema(self.schema.as_ref(), name)
    }
}

fn entity_schema<'s>(schema: &'s dyn SchemaDescriptor, name: &str) -> Result<&'s EntitySchema, StoreError> {
    schema
        .entity(name)
        .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
}

/// Read-only view used to follow foreign keys across tables.
struct View<'a> {
    schema: &'a dyn SchemaDescriptor,
    tables: &'a Tables,
}

impl<'a> View<'a> {
    fn find(&self, entity: &str, id: &Value) -> Option<&'a Row> {
        let schema = self.schema.entity(entity)?;
        self.tables
            .get(&entity.to_ascii_lowercase())?
            .iter()
            .find(|row| has_id(row, &schema.primary_key, id))
    }

    /// The value at `resolved`, or `None` when a document key along the path does not exist.
    ///
    /// Unset fields and unresolved relations read as `null`.
    fn value_at<'r>(&self, row: &'r Row, resolved: &ResolvedPath) -> Option<Value>
    where
        'a: 'r,
    {
        let mut current: &'r Row = row;
        for (hop, relation) in resolved.relations.iter().enumerate() {
            let next = match current.get(relation) {
                Some(Value::Object(related)) => Some(related),
                Some(Value::Null) | None => None,
                Some(fk) => resolved
                    .entities
                    .get(hop + 1)
                    .and_then(|target| self.find(target, fk)),
            };
            match next {
                Some(related) => current = related,
                None => return Some(Value::Null),
            }
        }
        let value = match &resolved.target {
            PathTarget::Field { name } => current.get(name).cloned().unwrap_or(Value::Null),
            PathTarget::Relation {
                name, primary_key, ..
            } => match current.get(name) {
                Some(Value::Object(related)) => {
                    related.get(primary_key).cloned().unwrap_or(Value::Null)
                }
                Some(raw) => raw.clone(),
                None => Value::Null,
            },
            PathTarget::Json { field, keys } => {
                return lookup_document(current.get(field).unwrap_or(&Value::Null), keys)
            }
        };
        Some(value)
    }

    fn matches(&self, row: &Row, predicate: &Predicate) -> bool {
        self.truth(row, predicate) == Some(true)
    }

    /// Three-valued evaluation: `None` when a condition reads a missing document key.
    ///
    /// Unknown never matches, and negating it stays unknown.
    fn truth(&self, row: &Row, predicate: &Predicate) -> Option<bool> {
        match predicate {
            Predicate::Always => Some(true),
            Predicate::Never => Some(false),
            Predicate::Condition(condition) => self.condition_truth(row, condition),
            Predicate::And { children } => {
                let mut result = Some(true);
                for child in children {
                    match self.truth(row, child) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or { children } => {
                let mut result = Some(false);
                for child in children {
                    match self.truth(row, child) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Predicate::Not { child } => self.truth(row, child).map(|value| !value),
        }
    }

    fn condition_truth(&self, row: &Row, condition: &Condition) -> Option<bool> {
        match self.value_at(row, &condition.path) {
            Some(actual) => Some(evaluate(condition.operator, &actual, &condition.value)),
            // A missing key counts as null for `isnull` and nothing else.
            None if condition.operator == Operator::IsNull => {
                Some(condition.value.as_bool() == Some(true))
            }
            None => None,
        }
    }

    fn order(&self, left: &Row, right: &Row, ordering: &[OrderTerm]) -> Ordering {
        for term in ordering {
            let a = self.value_at(left, &term.path).unwrap_or(Value::Null);
            let b = self.value_at(right, &term.path).unwrap_or(Value::Null);
            let cmp = sort_key_cmp(&a, &b);
            let cmp = if term.descending { cmp.reverse() } else { cmp };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    }

    /// Replaces the foreign key at each hop of `segments` with the related row.
    fn hydrate(&self, entity: &str, row: &mut Row, segments: &[&str]) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        let Some(target) = self
            .schema
            .entity(entity)
            .and_then(|schema| schema.relation_target(head))
        else {
            return;
        };
        let related = match row.get(*head) {
            Some(Value::Object(related)) => Some(related.clone()),
            Some(Value::Null) | None => return,
            Some(fk) => self.find(target, fk).cloned(),
        };
        // Dangling foreign keys hydrate as null.
        let Some(mut related) = related else {
            row.insert(head.to_string(), Value::Null);
            return;
        };
        self.hydrate(target, &mut related, rest);
        row.insert(head.to_string(), Value::Object(related));
    }
}

fn has_id(row: &Row, primary_key: &str, id: &Value) -> bool {
    row.get(primary_key)
        .is_some_and(|value| id_text(value) == id_text(id))
}

fn next_id(rows: &[Row], primary_key: &str) -> Value {
    let max = rows
        .iter()
        .filter_map(|row| row.get(primary_key).and_then(Value::as_i64))
        .max()
        .unwrap_or(0);
    Value::from(max + 1)
}

fn json_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn compare(actual: &Value, operand: &Value) -> Option<Ordering> {
    match (actual, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order for sorting: nulls first, then by type, then by value.
fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    compare(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}

fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    let raw = value.as_str()?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_utc());
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn date_part(operator: Operator, moment: &NaiveDateTime) -> Option<i64> {
    let part = match operator {
        Operator::Year => i64::from(moment.year()),
        Operator::Month => i64::from(moment.month()),
        Operator::Day => i64::from(moment.day()),
        Operator::WeekDay => i64::from(moment.weekday().number_from_sunday()),
        Operator::Hour => i64::from(moment.hour()),
        Operator::Minute => i64::from(moment.minute()),
        Operator::Second => i64::from(moment.second()),
        _ => return None,
    };
    Some(part)
}

fn text_match(operator: Operator, actual: &Value, operand: &Value) -> bool {
    let (Some(haystack), Some(needle)) = (actual.as_str(), operand.as_str()) else {
        return false;
    };
    let (haystack, needle) = if operator.is_case_insensitive() {
        (haystack.to_lowercase(), needle.to_lowercase())
    } else {
        (haystack.to_string(), needle.to_string())
    };
    match operator {
        Operator::IExact => haystack == needle,
        Operator::Contains | Operator::IContains => haystack.contains(&needle),
        Operator::StartsWith | Operator::IStartsWith => haystack.starts_with(&needle),
        Operator::EndsWith | Operator::IEndsWith => haystack.ends_with(&needle),
        _ => false,
    }
}

/// A `null` value never satisfies a comparison; only `isnull` and `exact: null` see it.
fn evaluate(operator: Operator, actual: &Value, operand: &Value) -> bool {
    match operator {
        Operator::Exact => json_eq(actual, operand),
        Operator::IExact
        | Operator::Contains
        | Operator::IContains
        | Operator::StartsWith
        | Operator::IStartsWith
        | Operator::EndsWith
        | Operator::IEndsWith => text_match(operator, actual, operand),
        Operator::Lt => compare(actual, operand) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare(actual, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Gt => compare(actual, operand) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare(actual, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Range => match operand.as_array().map(Vec::as_slice) {
            Some([low, high]) => {
                matches!(
                    compare(actual, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare(actual, high),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            _ => false,
        },
        Operator::In => operand
            .as_array()
            .is_some_and(|items| items.iter().any(|item| json_eq(actual, item))),
        Operator::IsNull => operand.as_bool() == Some(actual.is_null()),
        Operator::Regex | Operator::IRegex => {
            let (Some(text), Some(pattern)) = (actual.as_str(), operand.as_str()) else {
                return false;
            };
            RegexBuilder::new(pattern)
                .case_insensitive(operator == Operator::IRegex)
                .build()
                .map(|regex| regex.is_match(text))
                .unwrap_or(false)
        }
        Operator::Date => {
            let expected = operand
                .as_str()
                .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok());
            match (parse_datetime(actual), expected) {
                (Some(moment), Some(expected)) => moment.date() == expected,
                _ => false,
            }
        }
        Operator::Year
        | Operator::Month
        | Operator::Day
        | Operator::WeekDay
        | Operator::Hour
        | Operator::Minute
        | Operator::Second => match (parse_datetime(actual), operand.as_i64()) {
            (Some(moment), Some(expected)) => date_part(operator, &moment) == Some(expected),
            _ => false,
        },
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn fetch(&self, query: StoreQuery<'_>) -> Result<Vec<Row>, StoreError> {
        let schema = self.entity(query.entity)?;
        let tables = self.tables.read().await;
        let view = View {
            schema: self.schema.as_ref(),
            tables: &tables,
        };
        let empty = Vec::new();
        let rows = tables
            .get(&schema.name.to_ascii_lowercase())
            .unwrap_or(&empty);

        let mut matched: Vec<&Row> = rows
            .iter()
            .filter(|row| {
                query
                    .id
                    .map_or(true, |id| has_id(row, &schema.primary_key, id))
            })
            .filter(|row| view.matches(row, query.predicate))
            .collect();
        matched.sort_by(|a, b| view.order(a, b, query.ordering));

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        let relations: Vec<Vec<&str>> = query
            .relations
            .iter()
            .map(|path| path.split('.').collect())
            .collect();

        let page: Vec<Row> = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                let mut row = row.clone();
                for segments in &relations {
                    view.hydrate(&schema.name, &mut row, segments);
                }
                row
            })
            .collect();
        debug!(entity = %schema.name, rows = page.len(), "memory store fetch");
        Ok(page)
    }

    async fn count(&self, entity: &str, predicate: &Predicate) -> Result<Option<u64>, StoreError> {
        let schema = self.entity(entity)?;
        let tables = self.tables.read().await;
        let view = View {
            schema: self.schema.as_ref(),
            tables: &tables,
        };
        let count = tables
            .get(&schema.name.to_ascii_lowercase())
            .map(|rows| rows.iter().filter(|row| view.matches(row, predicate)).count())
            .unwrap_or(0);
        Ok(Some(count as u64))
    }

    async fn insert(&self, entity: &str, mut data: Row) -> Result<Row, StoreError> {
        let schema = self.entity(entity)?;
        let mut tables = self.tables.write().await;
        let rows = tables.entry(schema.name.to_ascii_lowercase()).or_default();
        match data.get(&schema.primary_key) {
            None | Some(Value::Null) => {
                let id = next_id(rows, &schema.primary_key);
                data.insert(schema.primary_key.clone(), id);
            }
            Some(id) => {
                if rows.iter().any(|row| has_id(row, &schema.primary_key, id)) {
                    return Err(StoreError::Conflict(format!(
                        "{} with {} {} already exists",
                        schema.name,
                        schema.primary_key,
                        id_text(id)
                    )));
                }
            }
        }
        rows.push(data.clone());
        Ok(data)
    }

    async fn update(
        &self,
        entity: &str,
        predicate: &Predicate,
        id: &Value,
        data: Row,
    ) -> Result<Option<Row>, StoreError> {
        let schema = self.entity(entity)?;
        let key = schema.name.to_ascii_lowercase();
        let mut tables = self.tables.write().await;
        let index = {
            let view = View {
                schema: self.schema.as_ref(),
                tables: &tables,
            };
            tables.get(&key).and_then(|rows| {
                rows.iter().position(|row| {
                    has_id(row, &schema.primary_key, id) && view.matches(row, predicate)
                })
            })
        };
        let Some(index) = index else {
            return Ok(None);
        };
        let Some(row) = tables.get_mut(&key).and_then(|rows| rows.get_mut(index)) else {
            return Ok(None);
        };
        for (field, value) in data {
            if field != schema.primary_key {
                row.insert(field, value);
            }
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&self, entity: &str, predicate: &Predicate, id: &Value) -> Result<bool, StoreError> {
        let schema = self.entity(entity)?;
        let key = schema.name.to_ascii_lowercase();
        let mut tables = self.tables.write().await;
        let index = {
            let view = View {
                schema: self.schema.as_ref(),
                tables: &tables,
            };
            tables.get(&key).and_then(|rows| {
                rows.iter().position(|row| {
                    has_id(row, &schema.primary_key, id) && view.matches(row, predicate)
                })
            })
        };
        match (index, tables.get_mut(&key)) {
            (Some(index), Some(rows)) => {
                rows.remove(index);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexquery_core_types::{EntitySchema, SchemaRegistry};
    use flexquery_query_compiler::{compile_ordering, FilterCompiler, PathResolver};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn schema() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::from_entities(vec![
                EntitySchema::new("article")
                    .fields(["id", "title", "status", "created_at"])
                    .json_field("metadata")
                    .relation("author", "author"),
                EntitySchema::new("author")
                    .fields(["id", "name"])
                    .relation("company", "company"),
                EntitySchema::new("company").fields(["id", "name"]),
            ])
            .unwrap(),
        )
    }

    fn store() -> MemoryStore {
        MemoryStore::from_value(
            schema(),
            json!({
                "company": [{"id": 1, "name": "Acme"}],
                "author": [
                    {"id": 1, "name": "Ada", "company": 1},
                    {"id": 2, "name": "Grace", "company": null},
                ],
                "article": [
                    {"id": 1, "title": "Rust tips", "status": "published", "author": 1,
                     "created_at": "2024-03-04T10:30:00Z", "metadata": {"tags": ["rust"], "views": 10}},
                    {"id": 2, "title": "Draft notes", "status": "draft", "author": 2,
                     "created_at": "2024-03-09 08:00:00", "metadata": "{\"views\": 3}"},
                    {"id": 3, "title": "Async in depth", "status": "published", "author": 1,
                     "created_at": "2023-12-31", "metadata": null},
                ],
            }),
        )
        .unwrap()
    }

    fn predicate(filters: Value) -> Predicate {
        let schema = schema();
        let resolver = PathResolver::new(schema.as_ref(), 2);
        FilterCompiler::new(&resolver, "article")
            .compile(&filters)
            .unwrap()
    }

    async fn ids(store: &MemoryStore, filters: Value) -> Vec<i64> {
        let predicate = predicate(filters);
        let relations = BTreeSet::new();
        store
            .fetch(StoreQuery {
                entity: "article",
                predicate: &predicate,
                ordering: &[],
                id: None,
                limit: None,
                offset: 0,
                relations: &relations,
            })
            .await
            .unwrap()
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_i64))
            .collect()
    }

    #[tokio::test]
    async fn evaluates_operators_across_relations_and_documents() {
        let store = store();
        assert_eq!(ids(&store, json!({"author.name": "Ada"})).await, vec![1, 3]);
        assert_eq!(ids(&store, json!({"author.company.name.icontains": "acm"})).await, vec![1, 3]);
        assert_eq!(ids(&store, json!({"author.company.isnull": true})).await, vec![2]);
        assert_eq!(ids(&store, json!({"title.istartswith": "rust"})).await, vec![1]);
        assert_eq!(ids(&store, json!({"title.regex": "^(Draft|Async)"})).await, vec![2, 3]);
        assert_eq!(ids(&store, json!({"id.in": [1, 3]})).await, vec![1, 3]);
        assert_eq!(ids(&store, json!({"id.range": [2, 3]})).await, vec![2, 3]);
        assert_eq!(ids(&store, json!({"metadata.views.gte": 5})).await, vec![1]);
        assert_eq!(ids(&store, json!({"metadata.views.lt": 5})).await, vec![2]);
        assert_eq!(ids(&store, json!({"metadata.views.isnull": true})).await, vec![3]);
        assert_eq!(ids(&store, json!({"created_at.year": 2024})).await, vec![1, 2]);
        assert_eq!(ids(&store, json!({"created_at.date": "2024-03-09"})).await, vec![2]);
        assert_eq!(ids(&store, json!({"created_at.week_day": 2})).await, vec![1]);
        assert_eq!(
            ids(&store, json!({"or": [{"status": "draft"}, {"not": {"author": 1}}]})).await,
            vec![2]
        );
    }

    #[tokio::test]
    async fn missing_document_keys_do_not_match() {
        let store = MemoryStore::from_value(
            schema(),
            json!({
                "article": [
                    {"id": 1, "metadata": {"settings": {"theme": null}}},
                    {"id": 2, "metadata": {}},
                    {"id": 3, "metadata": {"settings": {"theme": "dark"}}},
                ],
            }),
        )
        .unwrap();
        assert_eq!(ids(&store, json!({"metadata.settings.theme": null})).await, vec![1]);
        assert_eq!(ids(&store, json!({"metadata.settings.theme.exact": "dark"})).await, vec![3]);
        assert_eq!(ids(&store, json!({"metadata.settings.theme.isnull": true})).await, vec![1, 2]);
        assert_eq!(ids(&store, json!({"metadata.settings.theme.isnull": false})).await, vec![3]);
        assert_eq!(ids(&store, json!({"not": {"metadata.settings.theme": "dark"}})).await, vec![1]);
        assert_eq!(
            ids(&store, json!({"or": [{"metadata.settings.theme": "dark"}, {"id": 2}]})).await,
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn orders_pages_and_hydrates() {
        let store = store();
        let schema = schema();
        let resolver = PathResolver::new(schema.as_ref(), 2);
        let ordering =
            compile_ordering(&resolver, "article", &["-author.name".into(), "title".into()], None, None)
                .unwrap();
        let relations = BTreeSet::from(["author".to_string(), "author.company".to_string()]);
        let rows = store
            .fetch(StoreQuery {
                entity: "article",
                predicate: &Predicate::Always,
                ordering: &ordering,
                id: None,
                limit: Some(2),
                offset: 1,
                relations: &relations,
            })
            .await
            .unwrap();
        let titles: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("title").and_then(Value::as_str))
            .collect();
        assert_eq!(titles, vec!["Async in depth", "Rust tips"]);
        assert_eq!(
            rows[0].get("author"),
            Some(&json!({"id": 1, "name": "Ada", "company": {"id": 1, "name": "Acme"}}))
        );
    }

    #[tokio::test]
    async fn writes_respect_the_predicate() {
        let store = store();
        let created = store
            .insert("article", json!({"title": "New", "status": "draft"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(created.get("id"), Some(&json!(4)));
        let duplicate = json!({"id": 4}).as_object().cloned().unwrap();
        assert!(matches!(
            store.insert("article", duplicate).await,
            Err(StoreError::Conflict(_))
        ));

        let published = predicate(json!({"status": "published"}));
        let patch = json!({"title": "Renamed"}).as_object().cloned().unwrap();
        assert!(store
            .update("article", &published, &json!(2), patch.clone())
            .await
            .unwrap()
            .is_none());
        let updated = store
            .update("article", &published, &json!("1"), patch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("title"), Some(&json!("Renamed")));

        assert!(!store.delete("article", &published, &json!(2)).await.unwrap());
        assert!(store.delete("article", &Predicate::Always, &json!(2)).await.unwrap());
        assert_eq!(store.rows("article").await.len(), 3);
        assert_eq!(
            store.count("article", &published).await.unwrap(),
            Some(2)
        );
    }
}
