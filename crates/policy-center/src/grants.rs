//! Per-entity policy configuration and the grant shapes a role can carry.
//!
//! Every level distinguishes three states: the `"*"` / `"full"` sentinel,
//! an explicit value, and an empty or absent value that denies.

use std::collections::{BTreeMap, BTreeSet};

use flexquery_core_types::{Caller, FieldPath, OperationKind};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Marker key inside a row template that is replaced by a caller attribute.
pub const CALLER_PLACEHOLDER: &str = "$caller";

fn is_full_sentinel(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed == "*" || trimmed.eq_ignore_ascii_case("full")
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Paths never exposed on this entity, wildcard or not.
    pub exclude: BTreeSet<FieldPath>,
    pub roles: BTreeMap<String, RoleGrant>,
    pub rate_limit: Option<RateLimitSpec>,
}

impl PolicyConfig {
    pub fn with_role(mut self, role: impl Into<String>, grant: RoleGrant) -> Self {
        self.roles.insert(role.into(), grant);
        self
    }

    pub fn excluding(mut self, path: FieldPath) -> Self {
        self.exclude.insert(path);
        self
    }

    pub fn with_rate_limit(mut self, spec: RateLimitSpec) -> Self {
        self.rate_limit = Some(spec);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum RoleGrant {
    Full,
    Explicit(ExplicitGrant),
}

impl RoleGrant {
    pub fn deny() -> Self {
        RoleGrant::Explicit(ExplicitGrant::default())
    }
}

impl TryFrom<Value> for RoleGrant {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(ref raw) if is_full_sentinel(raw) => Ok(RoleGrant::Full),
            ref empty if is_empty_value(empty) => Ok(RoleGrant::deny()),
            Value::String(raw) => Err(format!("unknown role grant '{raw}'")),
            Value::Object(_) => serde_json::from_value::<ExplicitGrant>(value)
                .map(RoleGrant::Explicit)
                .map_err(|err| err.to_string()),
            other => Err(format!("role grant must be a mapping or \"*\", got {other}")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplicitGrant {
    pub rows: Option<RowSource>,
    pub fields: FieldGrant,
    pub filters: KeyGrant,
    #[serde(alias = "order")]
    pub order_by: KeyGrant,
    #[serde(alias = "operations")]
    pub ops: BTreeSet<OperationKind>,
    pub rate_limit: Option<RateLimitSpec>,
}

impl ExplicitGrant {
    pub fn with_rows(mut self, rows: RowSource) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_fields<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = FieldGrant::Patterns(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filters(mut self, filters: KeyGrant) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_order_by(mut self, order_by: KeyGrant) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_ops<I>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = OperationKind>,
    {
        self.ops = ops.into_iter().collect();
        self
    }

    pub fn with_rate_limit(mut self, spec: RateLimitSpec) -> Self {
        self.rate_limit = Some(spec);
        self
    }
}

/// Where the row predicate for a grant comes from.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum RowSource {
    Full,
    /// Declared but empty: no row is visible.
    Nothing,
    Template(RowTemplate),
}

impl TryFrom<Value> for RowSource {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(ref raw) if is_full_sentinel(raw) => Ok(RowSource::Full),
            ref empty if is_empty_value(empty) => Ok(RowSource::Nothing),
            Value::Object(map) => Ok(RowSource::Template(RowTemplate::new(map))),
            other => Err(format!(
                "rows must be \"*\" or a filter mapping, got {other}"
            )),
        }
    }
}

/// A filter tree whose leaf values may reference caller attributes.
///
/// `{"owner_id": {"$caller": "id"}}` binds to the requesting caller's id.
#[derive(Clone, Debug, PartialEq)]
pub struct RowTemplate(Map<String, Value>);

impl RowTemplate {
    pub fn new(tree: Map<String, Value>) -> Self {
        Self(tree)
    }

    pub fn tree(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Substitutes caller attributes. Returns the name of the first missing one on failure.
    pub fn bind(&self, caller: &Caller) -> Result<Value, String> {
        bind_value(&Value::Object(self.0.clone()), caller)
    }

    /// Names of caller attributes the template depends on.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_placeholders(&Value::Object(self.0.clone()), &mut names);
        names
    }
}

fn placeholder_name(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get(CALLER_PLACEHOLDER).and_then(Value::as_str)
}

fn bind_value(value: &Value, caller: &Caller) -> Result<Value, String> {
    match value {
        Value::Object(map) => {
            if let Some(name) = placeholder_name(map) {
                return caller
                    .attribute(name)
                    .cloned()
                    .ok_or_else(|| name.to_string());
            }
            let mut bound = Map::with_capacity(map.len());
            for (key, child) in map {
                bound.insert(key.clone(), bind_value(child, caller)?);
            }
            Ok(Value::Object(bound))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| bind_value(item, caller))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn collect_placeholders(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(name) = placeholder_name(map) {
                names.insert(name.to_string());
                return;
            }
            map.values().for_each(|child| collect_placeholders(child, names));
        }
        Value::Array(items) => items
            .iter()
            .for_each(|child| collect_placeholders(child, names)),
        _ => {}
    }
}

/// Field patterns a role may read and write.
///
/// `"*"` is shorthand for `["*"]`, which covers direct members only.
/// `"full"` covers every path, relation hops included.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum FieldGrant {
    Full,
    Patterns(Vec<String>),
}

impl Default for FieldGrant {
    fn default() -> Self {
        FieldGrant::Patterns(Vec::new())
    }
}

impl FieldGrant {
    pub fn direct_members() -> Self {
        FieldGrant::Patterns(vec!["*".to_string()])
    }
}

impl TryFrom<Value> for FieldGrant {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(ref raw) if raw.trim() == "*" => Ok(FieldGrant::direct_members()),
            Value::String(ref raw) if is_full_sentinel(raw) => Ok(FieldGrant::Full),
            ref empty if is_empty_value(empty) => Ok(FieldGrant::default()),
            Value::Array(items) => string_list(items, "fields").map(FieldGrant::Patterns),
            other => Err(format!("fields must be \"*\" or a list, got {other}")),
        }
    }
}

/// Exact-membership allowlist for filter and order keys.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub enum KeyGrant {
    Full,
    Only(BTreeSet<String>),
}

impl Default for KeyGrant {
    fn default() -> Self {
        KeyGrant::Only(BTreeSet::new())
    }
}

impl KeyGrant {
    pub fn only<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyGrant::Only(keys.into_iter().map(Into::into).collect())
    }

    /// No prefix or operator inference: `status` does not allow `status.in`.
    pub fn allows(&self, key: &str) -> bool {
        match self {
            KeyGrant::Full => true,
            KeyGrant::Only(keys) => keys.contains(key),
        }
    }
}

impl TryFrom<Value> for KeyGrant {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(ref raw) if is_full_sentinel(raw) => Ok(KeyGrant::Full),
            ref empty if is_empty_value(empty) => Ok(KeyGrant::default()),
            Value::Array(items) => {
                string_list(items, "keys").map(|keys| KeyGrant::Only(keys.into_iter().collect()))
            }
            other => Err(format!("key grant must be \"*\" or a list, got {other}")),
        }
    }
}

fn string_list(items: Vec<Value>, what: &str) -> Result<Vec<String>, String> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            other => Err(format!("{what} must be non-empty strings, got {other}")),
        })
        .collect()
}

/// Requests per minute, either flat or per operation with a `default`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub enum RateLimitSpec {
    PerMinute(u32),
    PerOperation {
        default: Option<u32>,
        ops: BTreeMap<OperationKind, u32>,
    },
}

impl RateLimitSpec {
    /// Operation-specific limit first, then this spec's default.
    pub fn limit_for(&self, op: OperationKind) -> Option<u32> {
        match self {
            RateLimitSpec::PerMinute(limit) => Some(*limit),
            RateLimitSpec::PerOperation { default, ops } => ops.get(&op).copied().or(*default),
        }
    }
}

fn to_limit(value: &Value) -> Result<u32, String> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("rate limit must be a non-negative integer, got {value}"))
}

impl TryFrom<Value> for RateLimitSpec {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(_) => to_limit(&value).map(RateLimitSpec::PerMinute),
            Value::Object(map) => {
                let mut default = None;
                let mut ops = BTreeMap::new();
                for (key, raw) in &map {
                    let limit = to_limit(raw)?;
                    if key == "default" {
                        default = Some(limit);
                    } else {
                        let op = key.parse::<OperationKind>().map_err(|err| err.to_string())?;
                        ops.insert(op, limit);
                    }
                }
                Ok(RateLimitSpec::PerOperation { default, ops })
            }
            other => Err(format!(
                "rate_limit must be an integer or a mapping, got {other}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn sentinel_and_empty_grants_differ() {
        let full: RoleGrant = serde_json::from_value(json!("*")).unwrap();
        assert_eq!(full, RoleGrant::Full);
        for empty in [json!(""), json!([]), json!({}), json!(null)] {
            let grant: RoleGrant = serde_json::from_value(empty).unwrap();
            assert_eq!(grant, RoleGrant::deny());
        }
        assert!(serde_json::from_value::<RoleGrant>(json!("everything")).is_err());
    }

    #[test]
    fn explicit_grant_parses_every_level() {
        let grant: RoleGrant = serde_json::from_value(json!({
            "rows": {"owner_id": {"$caller": "id"}},
            "fields": ["*", "author.*"],
            "filters": ["status", "status.in"],
            "order_by": "*",
            "ops": ["get", "query", "add"],
            "rate_limit": {"default": 30, "list": 10},
        }))
        .unwrap();
        let RoleGrant::Explicit(grant) = grant else {
            panic!("expected explicit grant");
        };
        assert_eq!(
            grant.fields,
            FieldGrant::Patterns(vec!["*".into(), "author.*".into()])
        );
        assert!(grant.filters.allows("status.in"));
        assert!(!grant.filters.allows("status.gte"));
        assert_eq!(grant.order_by, KeyGrant::Full);
        assert_eq!(
            grant.ops,
            BTreeSet::from([
                OperationKind::Get,
                OperationKind::List,
                OperationKind::Create
            ])
        );
        let limit = grant.rate_limit.unwrap();
        assert_eq!(limit.limit_for(OperationKind::List), Some(10));
        assert_eq!(limit.limit_for(OperationKind::Get), Some(30));
    }

    #[test]
    fn unknown_grant_keys_are_rejected() {
        let err = serde_json::from_value::<RoleGrant>(json!({"feilds": ["*"]})).unwrap_err();
        assert!(err.to_string().contains("feilds"));
    }

    #[test]
    fn empty_rows_match_nothing() {
        let grant: ExplicitGrant = serde_json::from_value(json!({"rows": {}})).unwrap();
        assert_eq!(grant.rows, Some(RowSource::Nothing));
        let grant: ExplicitGrant = serde_json::from_value(json!({"rows": null})).unwrap();
        assert_eq!(grant.rows, None);
    }

    #[test]
    fn row_template_binds_caller_attributes() {
        let RowSource::Template(template) =
            serde_json::from_value::<RowSource>(json!({
                "or": [{"owner_id": {"$caller": "id"}}, {"public": true}]
            }))
            .unwrap()
        else {
            panic!("expected template");
        };
        assert_eq!(template.placeholders(), BTreeSet::from(["id".to_string()]));
        let bound = template.bind(&Caller::user(7)).unwrap();
        assert_eq!(bound, json!({"or": [{"owner_id": 7}, {"public": true}]}));
        assert_eq!(template.bind(&Caller::anonymous()), Err("id".to_string()));
    }
}
