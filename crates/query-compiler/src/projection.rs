use std::collections::BTreeSet;

use flexquery_core_types::{DenialKind, FieldPath, FlexError, FlexResult};
use flexquery_policy_center::FieldGrant;
use serde::{Serialize, Serializer};

use crate::paths::{
    ExclusionSource, FieldOrigin, FieldPattern, PathResolver, PathTarget, ResolvedPath,
};

/// Field patterns a role holds, parsed once.
#[derive(Clone, Debug, PartialEq)]
pub enum GrantedFields {
    Full,
    Patterns(Vec<FieldPattern>),
}

impl GrantedFields {
    pub fn from_grant(grant: &FieldGrant) -> FlexResult<Self> {
        match grant {
            FieldGrant::Full => Ok(GrantedFields::Full),
            FieldGrant::Patterns(raw) => FieldPattern::parse_list(raw).map(GrantedFields::Patterns),
        }
    }

    pub fn patterns(&self) -> &[FieldPattern] {
        match self {
            GrantedFields::Full => &[],
            GrantedFields::Patterns(patterns) => patterns,
        }
    }

    pub fn covers(&self, resolved: &ResolvedPath) -> bool {
        match self {
            GrantedFields::Full => true,
            GrantedFields::Patterns(patterns) => patterns
                .iter()
                .any(|pattern| pattern_covers(pattern, resolved)),
        }
    }
}

fn pattern_covers(pattern: &FieldPattern, resolved: &ResolvedPath) -> bool {
    match pattern {
        FieldPattern::All => resolved.relations.is_empty(),
        FieldPattern::RelationAll(prefix) => resolved.relations.as_slice() == prefix.segments(),
        FieldPattern::Exact(path) => {
            if resolved.path == *path {
                return true;
            }
            // a granted document field, or a granted subtree of it, covers deeper keys
            matches!(resolved.target, PathTarget::Json { .. })
                && path.len() > resolved.relations.len()
                && resolved.path.starts_with(path)
        }
    }
}

/// Concrete fields a plan reads, in request order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Projection {
    fields: Vec<ResolvedPath>,
}

impl Projection {
    pub fn new(fields: Vec<ResolvedPath>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[ResolvedPath] {
        &self.fields
    }

    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.fields.iter().map(|field| &field.path)
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.fields.iter().any(|field| field.path == *path)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Relation paths to load eagerly, e.g. `author` and `author.company`.
    pub fn relations(&self) -> BTreeSet<String> {
        self.fields
            .iter()
            .flat_map(|field| field.relation_prefixes())
            .collect()
    }
}

impl Serialize for Projection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.fields.iter().map(|field| field.path.to_string()))
    }
}

/// Intersects the requested patterns with the grant.
///
/// Explicitly named fields outside the grant are denied by name; wildcard
/// expansions are quietly narrowed to what the grant covers.
pub fn project(
    resolver: &PathResolver<'_>,
    entity: &str,
    requested: &[String],
    granted: &GrantedFields,
    exclusions: &dyn ExclusionSource,
) -> FlexResult<Projection> {
    let mut patterns = FieldPattern::parse_list(requested)?;
    if patterns.is_empty() {
        patterns.push(FieldPattern::All);
    }
    let expanded = resolver.expand(entity, &patterns, exclusions)?;

    let mut fields = Vec::with_capacity(expanded.len());
    for field in expanded {
        if granted.covers(&field.resolved) {
            fields.push(field.resolved);
        } else if field.origin == FieldOrigin::Named {
            return Err(FlexError::denied(
                DenialKind::Field,
                field.resolved.path.to_string(),
            ));
        }
    }
    Ok(Projection::new(fields))
}
