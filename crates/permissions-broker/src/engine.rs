use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use flexquery_core_types::{
    Caller, DenialKind, FieldPath, FlexError, FlexResult, OperationKind, SchemaDescriptor,
};
use flexquery_policy_center::{
    EngineSettings, ExplicitGrant, FieldGrant, KeyGrant, PolicyError, PolicyStore, RoleGrant,
    RowSource,
};
use flexquery_query_compiler::{
    compile_ordering, project, split_filter_key, FieldPattern, FilterCompiler, GrantedFields,
    PaginationPlanner, PathResolver, Predicate, Projection, QueryRequest,
};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditTrail};
use crate::plan::{PlanParts, QueryPlan};
use crate::rate_limit::{resolve_limit, RateLimiter};
use crate::resolver::{resolve_role, RoleAssignment, RoleResolver};

const DEFAULT_AUDIT_CAPACITY: usize = 128;

/// What one role may do on one entity for one request.
#[derive(Clone, Debug)]
pub struct EffectiveGrant {
    pub role: String,
    /// Superuser: no policy lookup, no rate limit.
    pub bypass: bool,
    pub row_predicate: Predicate,
    pub fields: GrantedFields,
    pub filters: KeyGrant,
    pub order_by: KeyGrant,
    pub ops: BTreeSet<OperationKind>,
    /// Requests per minute for this operation, if any level sets one.
    pub rate_limit: Option<u32>,
}

pub struct PermissionEngineBuilder {
    policy: Arc<PolicyStore>,
    schema: Arc<dyn SchemaDescriptor>,
    resolver: Option<Arc<dyn RoleResolver>>,
    audit_capacity: usize,
}

impl PermissionEngineBuilder {
    pub fn with_role_resolver(mut self, resolver: Arc<dyn RoleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }

    /// Checks every grant against the schema before accepting requests.
    pub fn build(self) -> Result<PermissionEngine, PolicyError> {
        self.policy.check_schema(self.schema.as_ref())?;
        let settings = self.policy.settings();
        let resolver = PathResolver::new(self.schema.as_ref(), settings.security.max_relation_depth);

        let mut granted_fields = HashMap::new();
        for (entity, config) in self.policy.entities() {
            for (role, grant) in &config.roles {
                let fields = match grant {
                    RoleGrant::Full => GrantedFields::from_grant(&FieldGrant::direct_members()),
                    RoleGrant::Explicit(explicit) => {
                        validate_explicit(&resolver, entity, explicit)
                            .and_then(|_| GrantedFields::from_grant(&explicit.fields))
                    }
                }
                .map_err(|err| {
                    PolicyError::Invalid(format!("entity '{entity}' role '{role}': {err}"))
                })?;
                granted_fields.insert((entity.to_string(), role.clone()), fields);
            }
        }

        let audit = AuditTrail::new(self.audit_capacity, settings.audit_queries);
        let limiter = RateLimiter::new(settings.security.trust_forwarded_for);
        Ok(PermissionEngine {
            policy: self.policy,
            schema: self.schema,
            resolver: self.resolver,
            limiter,
            audit,
            granted_fields,
        })
    }
}

fn validate_explicit(
    resolver: &PathResolver<'_>,
    entity: &str,
    grant: &ExplicitGrant,
) -> FlexResult<()> {
    if let FieldGrant::Patterns(raw) = &grant.fields {
        for pattern in FieldPattern::parse_list(raw)? {
            resolver.validate_pattern(entity, &pattern)?;
        }
    }
    if let KeyGrant::Only(keys) = &grant.filters {
        for key in keys {
            let parsed = split_filter_key(key)?;
            resolver.resolve(entity, &parsed.path)?;
        }
    }
    if let KeyGrant::Only(keys) = &grant.order_by {
        for key in keys {
            let path = FieldPath::parse(key.strip_prefix('-').unwrap_or(key))?;
            resolver.resolve(entity, &path)?;
        }
    }
    if let Some(RowSource::Template(template)) = &grant.rows {
        let mut keys = Vec::new();
        template_keys(template.tree(), &mut keys);
        for key in keys {
            let parsed = split_filter_key(&key)?;
            resolver.resolve(entity, &parsed.path)?;
        }
    }
    Ok(())
}

fn template_keys(tree: &Map<String, Value>, out: &mut Vec<String>) {
    for (key, value) in tree {
        match key.as_str() {
            "and" | "or" | "not" => match value {
                Value::Object(map) => template_keys(map, out),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_object)
                    .for_each(|map| template_keys(map, out)),
                _ => {}
            },
            _ => out.push(key.clone()),
        }
    }
}

/// Turns caller requests into authorized [`QueryPlan`]s.
///
/// Policy and schema are read-only; only rate limit buckets change between calls.
pub struct PermissionEngine {
    policy: Arc<PolicyStore>,
    schema: Arc<dyn SchemaDescriptor>,
    resolver: Option<Arc<dyn RoleResolver>>,
    limiter: RateLimiter,
    audit: AuditTrail,
    granted_fields: HashMap<(String, String), GrantedFields>,
}

impl PermissionEngine {
    pub fn builder(
        policy: Arc<PolicyStore>,
        schema: Arc<dyn SchemaDescriptor>,
    ) -> PermissionEngineBuilder {
        PermissionEngineBuilder {
            policy,
            schema,
            resolver: None,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }

    pub fn new(
        policy: Arc<PolicyStore>,
        schema: Arc<dyn SchemaDescriptor>,
    ) -> Result<Self, PolicyError> {
        Self::builder(policy, schema).build()
    }

    pub fn settings(&self) -> &EngineSettings {
        self.policy.settings()
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn schema(&self) -> &dyn SchemaDescriptor {
        self.schema.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.audit.subscribe()
    }

    pub fn prune_rate_limits(&self, max_idle: Duration) -> usize {
        self.limiter.prune_idle(max_idle)
    }

    fn path_resolver(&self) -> PathResolver<'_> {
        PathResolver::new(
            self.schema.as_ref(),
            self.settings().security.max_relation_depth,
        )
    }

    /// Resolves the caller's role and the grant it holds for `op`.
    pub fn effective_grant(
        &self,
        caller: &Caller,
        entity: &str,
        op: OperationKind,
    ) -> FlexResult<EffectiveGrant> {
        let entity = normalize_entity(entity);
        let assignment = resolve_role(caller, &entity, self.resolver.as_deref())?;
        self.grant_for(caller, &entity, op, assignment)
    }

    fn grant_for(
        &self,
        caller: &Caller,
        entity: &str,
        op: OperationKind,
        assignment: RoleAssignment,
    ) -> FlexResult<EffectiveGrant> {
        if assignment.bypass {
            return Ok(EffectiveGrant {
                role: assignment.role,
                bypass: true,
                row_predicate: Predicate::Always,
                fields: GrantedFields::Full,
                filters: KeyGrant::Full,
                order_by: KeyGrant::Full,
                ops: OperationKind::ALL.into_iter().collect(),
                rate_limit: None,
            });
        }

        let Some(grant) = self.policy.grant(entity, &assignment.role) else {
            return Err(FlexError::denied(DenialKind::Operation, op.as_str()));
        };
        let entity_limit = self
            .policy
            .entity(entity)
            .and_then(|config| config.rate_limit.as_ref());
        let global_limit = self.settings().rate_limit;
        let fields = self
            .granted_fields
            .get(&(entity.to_string(), assignment.role.clone()))
            .cloned();

        match grant {
            RoleGrant::Full => Ok(EffectiveGrant {
                rate_limit: resolve_limit(None, entity_limit, global_limit, op),
                role: assignment.role,
                bypass: false,
                row_predicate: Predicate::Always,
                fields: match fields {
                    Some(fields) => fields,
                    None => GrantedFields::from_grant(&FieldGrant::direct_members())?,
                },
                filters: KeyGrant::Full,
                order_by: KeyGrant::Full,
                ops: OperationKind::ALL.into_iter().collect(),
            }),
            RoleGrant::Explicit(explicit) => {
                if !explicit.ops.contains(&op) {
                    return Err(FlexError::denied(DenialKind::Operation, op.as_str()));
                }
                let scope = explicit.rows.as_ref().or(assignment.row_scope.as_ref());
                let row_predicate = self.row_predicate(caller, entity, &assignment.role, scope)?;
                Ok(EffectiveGrant {
                    rate_limit: resolve_limit(
                        explicit.rate_limit.as_ref(),
                        entity_limit,
                        global_limit,
                        op,
                    ),
                    role: assignment.role,
                    bypass: false,
                    row_predicate,
                    fields: match fields {
                        Some(fields) => fields,
                        None => GrantedFields::from_grant(&explicit.fields)?,
                    },
                    filters: explicit.filters.clone(),
                    order_by: explicit.order_by.clone(),
                    ops: explicit.ops.clone(),
                })
            }
        }
    }

    /// Policy rows first, then the resolver's default scope, then everything.
    fn row_predicate(
        &self,
        caller: &Caller,
        entity: &str,
        role: &str,
        scope: Option<&RowSource>,
    ) -> FlexResult<Predicate> {
        let template = match scope {
            None | Some(RowSource::Full) => return Ok(Predicate::Always),
            Some(RowSource::Nothing) => return Ok(Predicate::Never),
            Some(RowSource::Template(template)) => template,
        };
        let tree = match template.bind(caller) {
            Ok(tree) => tree,
            Err(missing) => {
                warn!(
                    entity = %entity,
                    role = %role,
                    attribute = %missing,
                    "row scope needs a caller attribute that is missing, matching nothing"
                );
                return Ok(Predicate::Never);
            }
        };
        let resolver = self.path_resolver();
        FilterCompiler::new(&resolver, entity)
            .compile(&tree)
            .map_err(|err| FlexError::internal(format!("row scope for '{entity}': {err}")))
    }

    /// Validates `request` against the caller's grants and compiles it.
    ///
    /// Fails atomically on the first violation. Every attempt is audited.
    pub fn authorize(
        &self,
        caller: &Caller,
        entity: &str,
        request: &QueryRequest,
    ) -> FlexResult<QueryPlan> {
        let entity = normalize_entity(entity);
        let request_id = Uuid::new_v4();
        let mut event = AuditEvent::new(request_id, &entity);
        let result = self.compile(caller, &entity, request, request_id, &mut event);
        match &result {
            Ok(_) => self.audit.publish(event),
            Err(err) => self.audit.publish(event.denied(err)),
        }
        result
    }

    fn compile(
        &self,
        caller: &Caller,
        entity: &str,
        request: &QueryRequest,
        request_id: Uuid,
        event: &mut AuditEvent,
    ) -> FlexResult<QueryPlan> {
        let op = request.operation()?;
        event.operation = Some(op);
        let assignment = resolve_role(caller, entity, self.resolver.as_deref())?;
        event.role = Some(assignment.role.clone());
        let grant = self.grant_for(caller, entity, op, assignment)?;

        let resolver = self.path_resolver();
        let exclusions = self.policy.as_ref();
        let projection = match op {
            OperationKind::Delete => Projection::default(),
            _ => {
                let projection = project(
                    &resolver,
                    entity,
                    &request.spec.fields,
                    &grant.fields,
                    exclusions,
                )?;
                if op.is_read() && projection.is_empty() {
                    return Err(FlexError::denied(DenialKind::Field, "*"));
                }
                projection
            }
        };

        let filter = FilterCompiler::new(&resolver, entity)
            .with_allowlist(&grant.filters)
            .with_exclusions(exclusions)
            .compile(&request.spec.filters)?;
        let ordering = compile_ordering(
            &resolver,
            entity,
            &request.spec.order_by,
            Some(&grant.order_by),
            Some(exclusions),
        )?;

        let page = match op {
            OperationKind::List => Some(
                PaginationPlanner::new(&self.settings().pagination)
                    .plan(request.spec.limit, request.spec.offset)?,
            ),
            _ => None,
        };
        let target_id = request.target_id(op)?;
        let data = match op {
            OperationKind::Create | OperationKind::Update => {
                let data = request
                    .data
                    .as_ref()
                    .ok_or_else(|| FlexError::validation(format!("{op} requires data")))?;
                self.check_write(&resolver, entity, data, &grant.fields)?;
                Some(data.clone())
            }
            _ => None,
        };

        if let Some(limit) = grant.rate_limit {
            let key = self.limiter.bucket_key(caller, &grant.role, entity, op);
            if let Err(retry_after) = self.limiter.acquire(&key, limit) {
                debug!(
                    entity = %entity,
                    role = %grant.role,
                    op = %op,
                    retry_after = %humantime::format_duration(retry_after),
                    "rate limit exceeded"
                );
                return Err(FlexError::RateLimited { retry_after });
            }
        }

        debug!(
            entity = %entity,
            role = %grant.role,
            op = %op,
            fields = projection.len(),
            "query authorized"
        );
        Ok(QueryPlan::new(PlanParts {
            request_id,
            entity: entity.to_string(),
            role: grant.role,
            operation: op,
            row_predicate: grant.row_predicate,
            filter,
            projection,
            ordering,
            page,
            target_id,
            data,
            spec: request.spec.clone(),
        }))
    }

    /// Written keys must be direct members, not excluded, and covered by the grant.
    fn check_write(
        &self,
        resolver: &PathResolver<'_>,
        entity: &str,
        data: &Map<String, Value>,
        granted: &GrantedFields,
    ) -> FlexResult<()> {
        for key in data.keys() {
            let denied = || FlexError::denied(DenialKind::Field, key.as_str());
            let path = FieldPath::parse(key).map_err(|_| denied())?;
            if path.is_nested() {
                return Err(denied());
            }
            let resolved = resolver.resolve(entity, &path).map_err(|_| denied())?;
            if resolver.is_excluded(&resolved, self.policy.as_ref()) || !granted.covers(&resolved)
            {
                return Err(denied());
            }
        }
        Ok(())
    }
}

fn normalize_entity(entity: &str) -> String {
    entity.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexquery_core_types::{EntitySchema, SchemaRegistry};
    use flexquery_policy_center::parse_document;

    fn engine(policy: &str) -> Result<PermissionEngine, PolicyError> {
        let schema = SchemaRegistry::from_entities(vec![
            EntitySchema::new("note")
                .fields(["id", "body", "owner_id"])
                .json_field("extra"),
        ])
        .unwrap();
        let store = PolicyStore::new(parse_document(policy).unwrap()).unwrap();
        PermissionEngine::new(Arc::new(store), Arc::new(schema))
    }

    #[test]
    fn grants_are_checked_against_the_schema() {
        assert!(engine("entities:\n  note:\n    roles:\n      staff: {fields: [id, body]}\n").is_ok());
        let err = engine("entities:\n  note:\n    roles:\n      staff: {fields: [title]}\n")
            .err()
            .unwrap();
        assert!(err.to_string().contains("role 'staff'"));
        assert!(engine("entities:\n  note:\n    roles:\n      staff: {fields: ['extra.*']}\n").is_err());
        assert!(engine("entities:\n  note:\n    roles:\n      staff: {filters: [owner.in]}\n").is_err());
        assert!(engine(
            "entities:\n  note:\n    roles:\n      staff: {rows: {or: [{owner: {$caller: id}}]}}\n"
        )
        .is_err());
    }

    #[test]
    fn missing_caller_attribute_scopes_to_nothing() {
        let engine = engine(
            "entities:\n  note:\n    roles:\n      authenticated:\n        rows: {owner_id: {$caller: team}}\n        fields: ['*']\n        ops: [list]\n",
        )
        .unwrap();
        let grant = engine
            .effective_grant(&Caller::user(1), "Note", OperationKind::List)
            .unwrap();
        assert_eq!(grant.row_predicate, Predicate::Never);
        let grant = engine
            .effective_grant(
                &Caller::user(1).with_attribute("team", 4),
                "note",
                OperationKind::List,
            )
            .unwrap();
        assert_eq!(grant.row_predicate.conditions().len(), 1);
    }
}
