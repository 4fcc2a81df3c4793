//! Builds the nested response mapping for one row.
//!
//! Rows arrive with related rows hydrated under the relation name and
//! unloaded relations holding their raw foreign key.

use serde_json::{Map, Value};

use crate::paths::{PathTarget, ResolvedPath};
use crate::projection::Projection;

/// Reads the value at `resolved`. Missing keys and unloaded relations read as null.
pub fn extract(row: &Map<String, Value>, resolved: &ResolvedPath) -> Value {
    let mut current = row;
    for relation in &resolved.relations {
        match current.get(relation) {
            Some(Value::Object(related)) => current = related,
            _ => return Value::Null,
        }
    }

    match &resolved.target {
        PathTarget::Field { name } => current.get(name).cloned().unwrap_or(Value::Null),
        PathTarget::Relation {
            name, primary_key, ..
        } => match current.get(name) {
            Some(Value::Object(related)) => related.get(primary_key).cloned().unwrap_or(Value::Null),
            Some(raw) => raw.clone(),
            None => Value::Null,
        },
        PathTarget::Json { field, keys } => match current.get(field) {
            Some(document) => walk_document(document, keys),
            None => Value::Null,
        },
    }
}

/// Follows document keys. A stored string is parsed as JSON before descending.
pub fn walk_document(document: &Value, keys: &[String]) -> Value {
    lookup_document(document, keys).unwrap_or(Value::Null)
}

/// Like [`walk_document`], but `None` when a key along the way does not exist.
///
/// A key holding JSON `null` is present and yields `Some(Value::Null)`.
pub fn lookup_document(document: &Value, keys: &[String]) -> Option<Value> {
    if keys.is_empty() {
        return Some(document.clone());
    }
    let parsed;
    let root = match document {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            &parsed
        }
        other => other,
    };
    let mut current = root;
    for key in keys {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Projects `row` onto the granted fields as a nested mapping.
///
/// When a relation is requested both bare and with sub-fields, the nested mapping wins.
pub fn shape_row(row: &Map<String, Value>, projection: &Projection) -> Map<String, Value> {
    let mut shaped = Map::new();
    for field in projection.fields() {
        let value = extract(row, field);
        insert_nested(&mut shaped, field.path.segments(), value);
    }
    shaped
}

fn insert_nested(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        if !matches!(target.get(head), Some(Value::Object(_))) {
            target.insert(head.clone(), value);
        }
        return;
    }
    let slot = target
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(child) = slot {
        insert_nested(child, rest, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathResolver;
    use crate::test_support::blog_schema;
    use flexquery_core_types::FieldPath;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn projection(raw: &[&str]) -> Projection {
        let schema = blog_schema();
        let resolver = PathResolver::new(&schema, 2);
        Projection::new(
            raw.iter()
                .map(|p| {
                    resolver
                        .resolve("article", &FieldPath::parse(p).unwrap())
                        .unwrap()
                })
                .collect(),
        )
    }

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    #[test]
    fn nests_relation_fields() {
        let row = row(json!({
            "id": 1,
            "title": "Hello",
            "status": "published",
            "author": {"id": 9, "name": "Ada", "email": "ada@example.com"},
        }));
        let shaped = shape_row(&row, &projection(&["id", "title", "author.name"]));
        assert_eq!(
            Value::Object(shaped),
            json!({"id": 1, "title": "Hello", "author": {"name": "Ada"}})
        );
    }

    #[test]
    fn bare_relation_yields_identifier() {
        let hydrated = row(json!({"author": {"id": 9, "name": "Ada"}}));
        let raw = row(json!({"author": 9}));
        let fields = projection(&["author"]);
        assert_eq!(Value::Object(shape_row(&hydrated, &fields)), json!({"author": 9}));
        assert_eq!(Value::Object(shape_row(&raw, &fields)), json!({"author": 9}));
    }

    #[test]
    fn document_paths_walk_keys_and_tolerate_gaps() {
        let row = row(json!({
            "metadata": {"settings": {"theme": "dark"}, "tags": ["a", "b"]},
        }));
        let shaped = shape_row(
            &row,
            &projection(&["metadata.settings.theme", "metadata.tags.1", "metadata.missing.key"]),
        );
        assert_eq!(
            Value::Object(shaped),
            json!({"metadata": {
                "settings": {"theme": "dark"},
                "tags": {"1": "b"},
                "missing": {"key": null},
            }})
        );
    }

    #[test]
    fn string_documents_are_parsed() {
        let row = row(json!({"metadata": "{\"theme\": \"light\"}"}));
        let shaped = shape_row(&row, &projection(&["metadata.theme"]));
        assert_eq!(Value::Object(shaped), json!({"metadata": {"theme": "light"}}));
    }

    #[test]
    fn nested_mapping_wins_over_bare_relation() {
        let row = row(json!({"author": {"id": 9, "name": "Ada"}}));
        let shaped = shape_row(&row, &projection(&["author", "author.name"]));
        assert_eq!(Value::Object(shaped), json!({"author": {"name": "Ada"}}));
        let shaped = shape_row(&row, &projection(&["author.name", "author"]));
        assert_eq!(Value::Object(shaped), json!({"author": {"name": "Ada"}}));
    }

    #[test]
    fn unloaded_relation_reads_as_null() {
        let row = row(json!({"author": 9}));
        let shaped = shape_row(&row, &projection(&["author.name"]));
        assert_eq!(Value::Object(shaped), json!({"author": {"name": null}}));
    }

    #[test]
    fn lookup_separates_missing_keys_from_null() {
        let keys = |raw: &[&str]| raw.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        let document = json!({"settings": {"theme": null}, "tags": ["a"]});
        assert_eq!(lookup_document(&document, &keys(&["settings", "theme"])), Some(Value::Null));
        assert_eq!(lookup_document(&document, &keys(&["settings", "font"])), None);
        assert_eq!(lookup_document(&document, &keys(&["layout", "theme"])), None);
        assert_eq!(lookup_document(&document, &keys(&["tags", "0"])), Some(json!("a")));
        assert_eq!(lookup_document(&Value::Null, &keys(&["settings"])), None);
        assert_eq!(walk_document(&document, &keys(&["layout", "theme"])), Value::Null);
    }
}
