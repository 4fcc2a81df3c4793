//! Read-only description of entities, their fields, relations and document fields.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::FlexError;

/// How a single member name of an entity is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Json,
    Relation,
}

fn default_primary_key() -> String {
    "id".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub fields: Vec<String>,
    /// Relation name to target entity name.
    #[serde(default)]
    pub relations: BTreeMap<String, String>,
    #[serde(default)]
    pub json_fields: Vec<String>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            fields: Vec::new(),
            relations: BTreeMap::new(),
            json_fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn relation(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relations.insert(name.into(), target.into());
        self
    }

    pub fn json_field(mut self, name: impl Into<String>) -> Self {
        self.json_fields.push(name.into());
        self
    }

    pub fn with_primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    pub fn classify(&self, member: &str) -> Option<MemberKind> {
        if self.fields.iter().any(|f| f == member) {
            Some(MemberKind::Field)
        } else if self.json_fields.iter().any(|f| f == member) {
            Some(MemberKind::Json)
        } else if self.relations.contains_key(member) {
            Some(MemberKind::Relation)
        } else {
            None
        }
    }

    pub fn relation_target(&self, relation: &str) -> Option<&str> {
        self.relations.get(relation).map(String::as_str)
    }

    /// Every member name in declaration order: fields, document fields, relations.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(String::as_str)
            .chain(self.json_fields.iter().map(String::as_str))
            .chain(self.relations.keys().map(String::as_str))
    }

    pub fn validate(&self) -> Result<(), FlexError> {
        if self.name.trim().is_empty() {
            return Err(FlexError::validation("entity name must not be empty"));
        }
        let mut seen = BTreeSet::new();
        for member in self.members() {
            if member.is_empty() || member.contains('.') || member.contains('*') {
                return Err(FlexError::validation(format!(
                    "entity '{}' declares invalid member name '{member}'",
                    self.name
                )));
            }
            if !seen.insert(member) {
                return Err(FlexError::validation(format!(
                    "entity '{}' declares '{member}' more than once",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Host-supplied view of the data model.
pub trait SchemaDescriptor: Send + Sync {
    fn entity(&self, name: &str) -> Option<&EntitySchema>;

    fn fields(&self, entity: &str) -> Vec<String> {
        self.entity(entity)
            .map(|schema| schema.fields.clone())
            .unwrap_or_default()
    }

    fn relations(&self, entity: &str) -> BTreeMap<String, String> {
        self.entity(entity)
            .map(|schema| schema.relations.clone())
            .unwrap_or_default()
    }

    fn json_fields(&self, entity: &str) -> Vec<String> {
        self.entity(entity)
            .map(|schema| schema.json_fields.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDocument {
    #[serde(default)]
    entities: Vec<EntitySchema>,
}

/// In-memory schema keyed by lowercase entity name.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: Vec<EntitySchema>) -> Result<Self, FlexError> {
        let mut registry = Self::new();
        for entity in entities {
            entity.validate()?;
            let key = entity.name.to_ascii_lowercase();
            if registry.entities.insert(key, entity).is_some() {
                return Err(FlexError::validation("entity declared more than once"));
            }
        }
        registry.validate_relations()?;
        Ok(registry)
    }

    /// Accepts JSON first, then YAML.
    pub fn parse_str(raw: &str) -> Result<Self, FlexError> {
        let document: SchemaDocument = match serde_json::from_str(raw) {
            Ok(doc) => doc,
            Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
                FlexError::validation(format!(
                    "schema is neither valid json ({json_err}) nor yaml ({yaml_err})"
                ))
            })?,
        };
        Self::from_entities(document.entities)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, FlexError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            FlexError::internal(format!("failed to read schema {}: {err}", path.display()))
        })?;
        Self::parse_str(&raw)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.values().map(|schema| schema.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn validate_relations(&self) -> Result<(), FlexError> {
        for schema in self.entities.values() {
            for (relation, target) in &schema.relations {
                if !self.entities.contains_key(&target.to_ascii_lowercase()) {
                    return Err(FlexError::validation(format!(
                        "relation '{}.{relation}' targets unknown entity '{target}'",
                        schema.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl SchemaDescriptor for SchemaRegistry {
    fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(&name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOG: &str = r#"
entities:
  - name: article
    fields: [id, title, status, created_at]
    json_fields: [metadata]
    relations:
      author: author
  - name: author
    fields: [id, name, email]
    relations:
      company: company
  - name: company
    fields: [id, name]
"#;

    #[test]
    fn parses_yaml_schema() {
        let registry = SchemaRegistry::parse_str(BLOG).unwrap();
        assert_eq!(registry.len(), 3);
        let article = registry.entity("Article").unwrap();
        assert_eq!(article.classify("metadata"), Some(MemberKind::Json));
        assert_eq!(article.classify("author"), Some(MemberKind::Relation));
        assert_eq!(article.classify("title"), Some(MemberKind::Field));
        assert_eq!(article.classify("missing"), None);
        assert_eq!(article.primary_key, "id");
    }

    #[test]
    fn rejects_overlapping_member_names() {
        let entity = EntitySchema::new("article")
            .field("author")
            .relation("author", "author");
        assert!(entity.validate().is_err());
    }

    #[test]
    fn rejects_dangling_relation_target() {
        let err = SchemaRegistry::from_entities(vec![
            EntitySchema::new("article").relation("author", "person")
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unknown entity 'person'"));
    }
}
