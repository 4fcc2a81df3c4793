//! Filter tree compilation.
//!
//! Leaves are `{key: value}` pairs; `and`, `or` and `not` hold either a
//! mapping or a list of mappings. The result is a [`Predicate`] AST that
//! stores never re-interpret.

use flexquery_core_types::{DenialKind, FieldPath, FlexError, FlexResult};
use flexquery_policy_center::KeyGrant;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::operators::Operator;
use crate::paths::{ExclusionSource, PathResolver, PathTarget, ResolvedPath, LOOKUP_SEPARATOR};

/// Deepest `and`/`or`/`not` nesting accepted in one filter tree.
pub const MAX_FILTER_NESTING: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Condition {
    pub path: ResolvedPath,
    pub operator: Operator,
    pub value: Value,
    /// Store lookup, e.g. `author__name__icontains`.
    pub lookup: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    Never,
    Condition(Condition),
    And { children: Vec<Predicate> },
    Or { children: Vec<Predicate> },
    Not { child: Box<Predicate> },
}

impl Predicate {
    /// Conjunction with `Always` dropped and `Never` absorbing.
    pub fn all(children: Vec<Predicate>) -> Predicate {
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Predicate::Always => {}
                Predicate::Never => return Predicate::Never,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Predicate::Always,
            1 => kept.remove(0),
            _ => Predicate::And { children: kept },
        }
    }

    /// Disjunction with `Never` dropped and `Always` absorbing.
    pub fn any(children: Vec<Predicate>) -> Predicate {
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Predicate::Never => {}
                Predicate::Always => return Predicate::Always,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Predicate::Never,
            1 => kept.remove(0),
            _ => Predicate::Or { children: kept },
        }
    }

    pub fn negate(child: Predicate) -> Predicate {
        match child {
            Predicate::Always => Predicate::Never,
            Predicate::Never => Predicate::Always,
            Predicate::Not { child } => *child,
            other => Predicate::Not {
                child: Box::new(other),
            },
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    /// Leaf conditions in depth-first order.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Predicate::Condition(condition) => out.push(condition),
            Predicate::And { children } | Predicate::Or { children } => {
                children.iter().for_each(|child| child.collect_conditions(out))
            }
            Predicate::Not { child } => child.collect_conditions(out),
            Predicate::Always | Predicate::Never => {}
        }
    }
}

/// A filter key split into its path and optional operator suffix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterKey {
    pub path: FieldPath,
    pub operator: Option<Operator>,
}

/// The trailing segment is an operator only if it is in the vocabulary.
pub fn split_filter_key(key: &str) -> FlexResult<FilterKey> {
    let whole = FieldPath::parse(key)?;
    if whole.is_nested() {
        if let Some(operator) = Operator::from_word(whole.last()) {
            let path = whole.prefix(whole.len() - 1).ok_or_else(|| {
                FlexError::validation(format!("filter key '{key}' has no field"))
            })?;
            return Ok(FilterKey {
                path,
                operator: Some(operator),
            });
        }
    }
    Ok(FilterKey {
        path: whole,
        operator: None,
    })
}

#[derive(Clone, Copy, Debug)]
enum Connective {
    And,
    Or,
    Not,
}

impl Connective {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "and" => Some(Connective::And),
            "or" => Some(Connective::Or),
            "not" => Some(Connective::Not),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Connective::And => "and",
            Connective::Or => "or",
            Connective::Not => "not",
        }
    }
}

/// Compiles filter trees for one entity.
///
/// Without an allowlist every resolvable key is accepted; that mode is meant
/// for trusted trees such as row templates from the policy file.
pub struct FilterCompiler<'a> {
    resolver: &'a PathResolver<'a>,
    entity: &'a str,
    allowlist: Option<&'a KeyGrant>,
    exclusions: Option<&'a dyn ExclusionSource>,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(resolver: &'a PathResolver<'a>, entity: &'a str) -> Self {
        Self {
            resolver,
            entity,
            allowlist: None,
            exclusions: None,
        }
    }

    pub fn with_allowlist(mut self, allowlist: &'a KeyGrant) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    pub fn with_exclusions(mut self, exclusions: &'a dyn ExclusionSource) -> Self {
        self.exclusions = Some(exclusions);
        self
    }

    /// Compiles the whole tree or fails on the first offending leaf.
    pub fn compile(&self, tree: &Value) -> FlexResult<Predicate> {
        let predicate = match tree {
            Value::Null => Predicate::Always,
            Value::Object(map) => self.compile_mapping(map, 0)?,
            other => {
                return Err(FlexError::validation(format!(
                    "filters must be a mapping, got {other}"
                )))
            }
        };
        debug!(entity = %self.entity, leaves = predicate.conditions().len(), "compiled filter tree");
        Ok(predicate)
    }

    fn compile_mapping(&self, map: &Map<String, Value>, depth: usize) -> FlexResult<Predicate> {
        let children = map
            .iter()
            .map(|(key, value)| self.compile_entry(key, value, depth))
            .collect::<FlexResult<Vec<_>>>()?;
        Ok(Predicate::all(children))
    }

    fn compile_entry(&self, key: &str, value: &Value, depth: usize) -> FlexResult<Predicate> {
        match Connective::from_key(key) {
            Some(connective) => self.compile_connective(connective, value, depth + 1),
            None => self.compile_leaf(key, value),
        }
    }

    fn compile_connective(
        &self,
        connective: Connective,
        value: &Value,
        depth: usize,
    ) -> FlexResult<Predicate> {
        if depth > MAX_FILTER_NESTING {
            return Err(FlexError::validation(format!(
                "filters nest deeper than {MAX_FILTER_NESTING} levels"
            )));
        }
        let children = match value {
            Value::Null => Vec::new(),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| self.compile_entry(key, value, depth))
                .collect::<FlexResult<Vec<_>>>()?,
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => self.compile_mapping(map, depth),
                    other => Err(FlexError::validation(format!(
                        "'{}' list items must be mappings, got {other}",
                        connective.name()
                    ))),
                })
                .collect::<FlexResult<Vec<_>>>()?,
            other => {
                return Err(FlexError::validation(format!(
                    "'{}' expects a mapping or a list, got {other}",
                    connective.name()
                )))
            }
        };
        if children.is_empty() {
            return Ok(Predicate::Always);
        }
        Ok(match connective {
            Connective::And => Predicate::all(children),
            Connective::Or => Predicate::any(children),
            Connective::Not => Predicate::negate(Predicate::all(children)),
        })
    }

    fn compile_leaf(&self, key: &str, value: &Value) -> FlexResult<Predicate> {
        let parsed = split_filter_key(key)?;
        self.resolver.check_depth(self.entity, &parsed.path)?;

        if let Some(allowlist) = self.allowlist {
            if !allowlist.allows(key.trim()) {
                return Err(FlexError::denied(DenialKind::Filter, key.trim()));
            }
        }

        if let Some(operator) = parsed.operator {
            if self.names_schema_member(key) {
                return Err(FlexError::validation(format!(
                    "filter key '{key}' is ambiguous: '{operator}' is both an operator and a field, use '{key}.exact'"
                )));
            }
        }

        let resolved = self.resolver.resolve(self.entity, &parsed.path)?;
        if let Some(exclusions) = self.exclusions {
            if self.resolver.is_excluded(&resolved, exclusions) {
                return Err(FlexError::denied(DenialKind::Filter, key.trim()));
            }
        }

        let operator = parsed.operator.unwrap_or(Operator::Exact);
        operator
            .validate_operand(value)
            .map_err(|reason| FlexError::validation(format!("filter '{key}': {reason}")))?;

        let lookup = match parsed.operator {
            Some(op) => format!("{}{LOOKUP_SEPARATOR}{}", resolved.lookup(), op),
            None => resolved.lookup(),
        };
        Ok(Predicate::Condition(Condition {
            path: resolved,
            operator,
            value: value.clone(),
            lookup,
        }))
    }

    /// True when the full key, operator word included, is a real schema path.
    fn names_schema_member(&self, key: &str) -> bool {
        let Ok(whole) = FieldPath::parse(key) else {
            return false;
        };
        match self.resolver.resolve(self.entity, &whole) {
            Ok(resolved) => match resolved.target {
                PathTarget::Json { ref keys, .. } => keys.is_empty(),
                _ => true,
            },
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blog_schema;
    use flexquery_core_types::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn compile_with(grant: &KeyGrant, tree: Value) -> FlexResult<Predicate> {
        let schema = blog_schema();
        let resolver = PathResolver::new(&schema, 2);
        FilterCompiler::new(&resolver, "article")
            .with_allowlist(grant)
            .compile(&tree)
    }

    fn lookups(predicate: &Predicate) -> Vec<String> {
        predicate
            .conditions()
            .into_iter()
            .map(|c| c.lookup.clone())
            .collect()
    }

    #[test]
    fn splits_operator_suffix() {
        let key = split_filter_key("author.name.icontains").unwrap();
        assert_eq!(key.path.to_string(), "author.name");
        assert_eq!(key.operator, Some(Operator::IContains));
        let key = split_filter_key("status").unwrap();
        assert_eq!(key.operator, None);
        let key = split_filter_key("in").unwrap();
        assert_eq!(key.path.to_string(), "in");
        assert_eq!(key.operator, None);
    }

    #[test]
    fn bare_key_does_not_grant_operators() {
        let grant = KeyGrant::only(["status"]);
        assert!(compile_with(&grant, json!({"status": "published"})).is_ok());
        for key in ["status.in", "status.gte"] {
            let err = compile_with(&grant, json!({ key: ["a"] })).unwrap_err();
            assert_eq!(err, FlexError::denied(DenialKind::Filter, key));
        }
    }

    #[test]
    fn composes_and_or_not() {
        let predicate = compile_with(
            &KeyGrant::Full,
            json!({
                "title.icontains": "rust",
                "or": [{"status": "draft"}, {"status": "published"}],
                "not": {"author.name.startswith": "Bot"},
            }),
        )
        .unwrap();
        let Predicate::And { children } = &predicate else {
            panic!("expected conjunction, got {predicate:?}");
        };
        assert_eq!(children.len(), 3);
        assert!(matches!(children[1], Predicate::Or { .. }));
        assert!(matches!(children[2], Predicate::Not { .. }));
        assert_eq!(
            lookups(&predicate),
            vec![
                "title__icontains",
                "status",
                "status",
                "author__name__startswith"
            ]
        );
    }

    #[test]
    fn or_mapping_is_a_disjunction_of_entries() {
        let predicate = compile_with(
            &KeyGrant::Full,
            json!({"or": {"status": "draft", "title": "x"}}),
        )
        .unwrap();
        assert!(matches!(predicate, Predicate::Or { ref children } if children.len() == 2));
    }

    #[test]
    fn empty_composites_match_everything() {
        assert_eq!(compile_with(&KeyGrant::Full, json!({})).unwrap(), Predicate::Always);
        assert_eq!(
            compile_with(&KeyGrant::Full, json!({"or": []})).unwrap(),
            Predicate::Always
        );
        assert_eq!(
            compile_with(&KeyGrant::Full, Value::Null).unwrap(),
            Predicate::Always
        );
    }

    #[test]
    fn first_denied_leaf_aborts_compilation() {
        let grant = KeyGrant::only(["status"]);
        let err = compile_with(
            &grant,
            json!({"and": [{"status": "draft"}, {"title": "x"}]}),
        )
        .unwrap_err();
        assert_eq!(err, FlexError::denied(DenialKind::Filter, "title"));
    }

    #[test]
    fn document_keys_never_collide_with_operators() {
        let predicate = compile_with(&KeyGrant::Full, json!({"metadata.tags.in": ["a"]})).unwrap();
        let conditions = predicate.conditions();
        assert_eq!(conditions[0].operator, Operator::In);
        assert_eq!(conditions[0].lookup, "metadata__tags__in");
    }

    #[test]
    fn operator_field_collision_is_rejected() {
        let err = compile_with(&KeyGrant::Full, json!({"schedule.range": [1, 2]})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("ambiguous"));

        let predicate =
            compile_with(&KeyGrant::Full, json!({"schedule.range.exact": "q1"})).unwrap();
        assert_eq!(lookups(&predicate), vec!["schedule__range__exact"]);
    }

    #[test]
    fn unknown_paths_and_bad_operands_are_validation_errors() {
        let err = compile_with(&KeyGrant::Full, json!({"nope": 1})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = compile_with(&KeyGrant::Full, json!({"status.in": "draft"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = compile_with(&KeyGrant::Full, json!(["status"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn depth_is_checked_before_the_allowlist() {
        let err = compile_with(
            &KeyGrant::only(["status"]),
            json!({"author.company.owner.name": "x"}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RelationDepthExceeded);
    }

    #[test]
    fn excluded_paths_cannot_be_filtered() {
        let schema = blog_schema();
        let resolver = PathResolver::new(&schema, 2);
        let mut exclusions: BTreeMap<String, BTreeSet<FieldPath>> = BTreeMap::new();
        exclusions
            .entry("author".into())
            .or_default()
            .insert(FieldPath::parse("email").unwrap());
        let grant = KeyGrant::Full;
        let err = FilterCompiler::new(&resolver, "article")
            .with_allowlist(&grant)
            .with_exclusions(&exclusions)
            .compile(&json!({"author.email.endswith": "@corp"}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn nesting_is_bounded() {
        let mut tree = json!({"status": "draft"});
        for _ in 0..=MAX_FILTER_NESTING {
            tree = json!({ "and": tree });
        }
        let err = compile_with(&KeyGrant::Full, tree).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
