//! Dotted path classification and wildcard expansion.
//!
//! A path is walked against the schema one segment at a time. Relation
//! segments hop to the target entity; the first document field switches the
//! walk into opaque key traversal, so nothing after it is classified.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use flexquery_core_types::{
    DenialKind, EntitySchema, FieldPath, FlexError, FlexResult, MemberKind, SchemaDescriptor,
};
use flexquery_policy_center::PolicyStore;
use serde::Serialize;

/// Separator used by store lookups, e.g. `author__name__icontains`.
pub const LOOKUP_SEPARATOR: &str = "__";

/// Source of per-entity exclusion lists.
pub trait ExclusionSource {
    fn excluded(&self, entity: &str) -> Option<&BTreeSet<FieldPath>>;
}

impl ExclusionSource for PolicyStore {
    fn excluded(&self, entity: &str) -> Option<&BTreeSet<FieldPath>> {
        self.exclude(entity)
    }
}

impl ExclusionSource for BTreeMap<String, BTreeSet<FieldPath>> {
    fn excluded(&self, entity: &str) -> Option<&BTreeSet<FieldPath>> {
        self.get(&entity.to_ascii_lowercase())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathTarget {
    Field {
        name: String,
    },
    /// A relation requested bare: its foreign key, not the related row.
    Relation {
        name: String,
        target_entity: String,
        primary_key: String,
    },
    Json {
        field: String,
        keys: Vec<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    pub path: FieldPath,
    /// Relation hops walked before the terminal member.
    pub relations: Vec<String>,
    /// Entity at each hop, root first. One longer than `relations`.
    pub entities: Vec<String>,
    pub target: PathTarget,
}

impl ResolvedPath {
    pub fn relation_depth(&self) -> usize {
        self.relations.len()
    }

    /// Entity that owns the terminal member.
    pub fn owner(&self) -> &str {
        self.entities.last().map(String::as_str).unwrap_or_default()
    }

    pub fn member(&self) -> &str {
        match &self.target {
            PathTarget::Field { name } | PathTarget::Relation { name, .. } => name,
            PathTarget::Json { field, .. } => field,
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.target, PathTarget::Json { .. })
    }

    pub fn lookup(&self) -> String {
        self.path.join(LOOKUP_SEPARATOR)
    }

    /// Dotted relation prefixes that must be loaded to read this path.
    pub fn relation_prefixes(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.relations.len()).map(move |len| self.relations[..len].join("."))
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}

/// One entry of a field pattern list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldPattern {
    /// `*`: every direct member of the entity.
    All,
    /// `relation.*`: every direct member of the related entity.
    RelationAll(FieldPath),
    Exact(FieldPath),
}

impl FieldPattern {
    pub fn parse(raw: &str) -> FlexResult<Self> {
        let trimmed = raw.trim();
        if trimmed == "*" {
            return Ok(FieldPattern::All);
        }
        if let Some(prefix) = trimmed.strip_suffix(".*") {
            return FieldPath::parse(prefix).map(FieldPattern::RelationAll);
        }
        FieldPath::parse(trimmed).map(FieldPattern::Exact)
    }

    pub fn parse_list<S: AsRef<str>>(raw: &[S]) -> FlexResult<Vec<Self>> {
        raw.iter().map(|item| Self::parse(item.as_ref())).collect()
    }
}

impl fmt::Display for FieldPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPattern::All => f.write_str("*"),
            FieldPattern::RelationAll(prefix) => write!(f, "{prefix}.*"),
            FieldPattern::Exact(path) => path.fmt(f),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOrigin {
    Wildcard,
    Named,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpandedField {
    pub resolved: ResolvedPath,
    pub origin: FieldOrigin,
}

pub struct PathResolver<'a> {
    schema: &'a dyn SchemaDescriptor,
    max_depth: usize,
}

impl<'a> PathResolver<'a> {
    pub fn new(schema: &'a dyn SchemaDescriptor, max_depth: usize) -> Self {
        Self { schema, max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn schema(&self) -> &'a dyn SchemaDescriptor {
        self.schema
    }

    pub fn entity(&self, name: &str) -> FlexResult<&'a EntitySchema> {
        self.schema
            .entity(name)
            .ok_or_else(|| FlexError::validation(format!("unknown entity '{name}'")))
    }

    /// Relation hops before the terminal segment. Unknown segments count as hops.
    pub fn relation_depth(&self, entity: &str, path: &FieldPath) -> usize {
        let segments = path.segments();
        let mut current = self.schema.entity(entity);
        let mut hops = 0;
        for segment in &segments[..segments.len().saturating_sub(1)] {
            match current.map(|schema| (schema, schema.classify(segment))) {
                Some((schema, Some(MemberKind::Relation))) => {
                    hops += 1;
                    current = schema
                        .relation_target(segment)
                        .and_then(|target| self.schema.entity(target));
                }
                Some((_, Some(MemberKind::Json))) | Some((_, Some(MemberKind::Field))) => break,
                Some((_, None)) | None => {
                    hops += 1;
                    current = None;
                }
            }
        }
        hops
    }

    pub fn check_depth(&self, entity: &str, path: &FieldPath) -> FlexResult<()> {
        if self.relation_depth(entity, path) > self.max_depth {
            return Err(FlexError::RelationDepthExceeded {
                path: path.to_string(),
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    /// Classifies `path` against the schema. Depth is checked before anything else.
    pub fn resolve(&self, entity: &str, path: &FieldPath) -> FlexResult<ResolvedPath> {
        self.check_depth(entity, path)?;
        let mut current = self.entity(entity)?;
        let mut relations = Vec::new();
        let mut entities = vec![current.name.clone()];
        let segments = path.segments();

        for (index, segment) in segments.iter().enumerate() {
            let last = index + 1 == segments.len();
            match current.classify(segment) {
                None => {
                    return Err(FlexError::validation(format!(
                        "unknown field '{path}'"
                    )))
                }
                Some(MemberKind::Field) if last => {
                    return Ok(ResolvedPath {
                        path: path.clone(),
                        relations,
                        entities,
                        target: PathTarget::Field {
                            name: segment.clone(),
                        },
                    })
                }
                Some(MemberKind::Field) => {
                    return Err(FlexError::validation(format!(
                        "'{segment}' in '{path}' is neither a relation nor a document field"
                    )))
                }
                Some(MemberKind::Json) => {
                    return Ok(ResolvedPath {
                        path: path.clone(),
                        relations,
                        entities,
                        target: PathTarget::Json {
                            field: segment.clone(),
                            keys: segments[index + 1..].to_vec(),
                        },
                    })
                }
                Some(MemberKind::Relation) => {
                    let target = self.relation_schema(current, segment)?;
                    if last {
                        return Ok(ResolvedPath {
                            path: path.clone(),
                            relations,
                            entities,
                            target: PathTarget::Relation {
                                name: segment.clone(),
                                target_entity: target.name.clone(),
                                primary_key: target.primary_key.clone(),
                            },
                        });
                    }
                    relations.push(segment.clone());
                    entities.push(target.name.clone());
                    current = target;
                }
            }
        }
        Err(FlexError::validation("empty field path"))
    }

    /// Exclusions are scoped per entity and checked at every hop.
    pub fn is_excluded(&self, resolved: &ResolvedPath, exclusions: &dyn ExclusionSource) -> bool {
        let segments = resolved.path.segments();
        resolved
            .entities
            .iter()
            .enumerate()
            .any(|(hop, entity)| match exclusions.excluded(entity) {
                Some(excluded) => {
                    let suffix = &segments[hop..];
                    excluded
                        .iter()
                        .any(|entry| suffix.starts_with(entry.segments()))
                }
                None => false,
            })
    }

    /// Expands patterns into concrete paths, deduplicated in request order.
    ///
    /// Excluded members silently drop out of wildcards; naming one explicitly is a denial.
    pub fn expand(
        &self,
        entity: &str,
        patterns: &[FieldPattern],
        exclusions: &dyn ExclusionSource,
    ) -> FlexResult<Vec<ExpandedField>> {
        let mut expanded: Vec<ExpandedField> = Vec::new();
        let mut positions: BTreeMap<FieldPath, usize> = BTreeMap::new();
        let mut push = |field: ExpandedField| match positions.get(&field.resolved.path) {
            Some(&index) => {
                if field.origin == FieldOrigin::Named {
                    expanded[index].origin = FieldOrigin::Named;
                }
            }
            None => {
                positions.insert(field.resolved.path.clone(), expanded.len());
                expanded.push(field);
            }
        };

        for pattern in patterns {
            match pattern {
                FieldPattern::All => {
                    let root = self.entity(entity)?;
                    for resolved in self.members_of(root, &[], vec![root.name.clone()])? {
                        if !self.is_excluded(&resolved, exclusions) {
                            push(ExpandedField {
                                resolved,
                                origin: FieldOrigin::Wildcard,
                            });
                        }
                    }
                }
                FieldPattern::RelationAll(prefix) => {
                    let (schema, entities) = self.walk_relations(entity, prefix)?;
                    for resolved in self.members_of(schema, prefix.segments(), entities)? {
                        if !self.is_excluded(&resolved, exclusions) {
                            push(ExpandedField {
                                resolved,
                                origin: FieldOrigin::Wildcard,
                            });
                        }
                    }
                }
                FieldPattern::Exact(path) => {
                    let resolved = self.resolve(entity, path)?;
                    if self.is_excluded(&resolved, exclusions) {
                        return Err(FlexError::denied(DenialKind::Field, path.to_string()));
                    }
                    push(ExpandedField {
                        resolved,
                        origin: FieldOrigin::Named,
                    });
                }
            }
        }
        Ok(expanded)
    }

    /// Checks that a pattern is well formed for `entity` without expanding it.
    pub fn validate_pattern(&self, entity: &str, pattern: &FieldPattern) -> FlexResult<()> {
        match pattern {
            FieldPattern::All => self.entity(entity).map(|_| ()),
            FieldPattern::RelationAll(prefix) => self.walk_relations(entity, prefix).map(|_| ()),
            FieldPattern::Exact(path) => self.resolve(entity, path).map(|_| ()),
        }
    }

    fn relation_schema(
        &self,
        owner: &EntitySchema,
        relation: &str,
    ) -> FlexResult<&'a EntitySchema> {
        owner
            .relation_target(relation)
            .and_then(|target| self.schema.entity(target))
            .ok_or_else(|| {
                FlexError::internal(format!(
                    "relation '{}.{relation}' has no target entity",
                    owner.name
                ))
            })
    }

    /// Walks a `relation.*` prefix. Every segment must be a relation.
    fn walk_relations(
        &self,
        entity: &str,
        prefix: &FieldPath,
    ) -> FlexResult<(&'a EntitySchema, Vec<String>)> {
        if prefix.len() > self.max_depth {
            return Err(FlexError::RelationDepthExceeded {
                path: format!("{prefix}.*"),
                limit: self.max_depth,
            });
        }
        let mut current = self.entity(entity)?;
        let mut entities = vec![current.name.clone()];
        for segment in prefix.segments() {
            match current.classify(segment) {
                Some(MemberKind::Relation) => {
                    current = self.relation_schema(current, segment)?;
                    entities.push(current.name.clone());
                }
                Some(MemberKind::Json) => {
                    return Err(FlexError::validation(format!(
                        "wildcards into document field '{prefix}' are not supported"
                    )))
                }
                Some(MemberKind::Field) => {
                    return Err(FlexError::validation(format!(
                        "'{segment}' in '{prefix}.*' is not a relation"
                    )))
                }
                None => {
                    return Err(FlexError::validation(format!(
                        "unknown relation '{prefix}'"
                    )))
                }
            }
        }
        Ok((current, entities))
    }

    fn members_of(
        &self,
        schema: &EntitySchema,
        prefix: &[String],
        entities: Vec<String>,
    ) -> FlexResult<Vec<ResolvedPath>> {
        let mut resolved = Vec::new();
        for member in schema.members() {
            let mut segments = prefix.to_vec();
            segments.push(member.to_string());
            let path = FieldPath::from_segments(segments)?;
            let target = match schema.classify(member) {
                Some(MemberKind::Field) | None => PathTarget::Field {
                    name: member.to_string(),
                },
                Some(MemberKind::Json) => PathTarget::Json {
                    field: member.to_string(),
                    keys: Vec::new(),
                },
                Some(MemberKind::Relation) => {
                    let target = self.relation_schema(schema, member)?;
                    PathTarget::Relation {
                        name: member.to_string(),
                        target_entity: target.name.clone(),
                        primary_key: target.primary_key.clone(),
                    }
                }
            };
            resolved.push(ResolvedPath {
                path,
                relations: prefix.to_vec(),
                entities: entities.clone(),
                target,
            });
        }
        Ok(resolved)
    }
}
