use std::collections::BTreeSet;

use flexquery_core_types::OperationKind;
use flexquery_query_compiler::{OrderTerm, PagePlan, Predicate, Projection, QuerySpec};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A fully authorized, store-agnostic execution instruction.
///
/// Only [`crate::PermissionEngine::authorize`] builds one.
#[derive(Clone, Debug, Serialize)]
pub struct QueryPlan {
    request_id: Uuid,
    entity: String,
    role: String,
    operation: OperationKind,
    row_predicate: Predicate,
    filter: Predicate,
    predicate: Predicate,
    projection: Projection,
    relations: BTreeSet<String>,
    ordering: Vec<OrderTerm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<PagePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(skip)]
    spec: QuerySpec,
}

pub(crate) struct PlanParts {
    pub request_id: Uuid,
    pub entity: String,
    pub role: String,
    pub operation: OperationKind,
    pub row_predicate: Predicate,
    pub filter: Predicate,
    pub projection: Projection,
    pub ordering: Vec<OrderTerm>,
    pub page: Option<PagePlan>,
    pub target_id: Option<Value>,
    pub data: Option<Map<String, Value>>,
    pub spec: QuerySpec,
}

impl QueryPlan {
    pub(crate) fn new(parts: PlanParts) -> Self {
        let predicate = Predicate::all(vec![parts.row_predicate.clone(), parts.filter.clone()]);
        let relations = parts.projection.relations();
        Self {
            request_id: parts.request_id,
            entity: parts.entity,
            role: parts.role,
            operation: parts.operation,
            row_predicate: parts.row_predicate,
            filter: parts.filter,
            predicate,
            projection: parts.projection,
            relations,
            ordering: parts.ordering,
            page: parts.page,
            target_id: parts.target_id,
            data: parts.data,
            spec: parts.spec,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn row_predicate(&self) -> &Predicate {
        &self.row_predicate
    }

    /// The caller's compiled filter tree, without row scope.
    pub fn filter(&self) -> &Predicate {
        &self.filter
    }

    /// Row scope AND caller filter. Stores apply this one.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Relation paths to load eagerly.
    pub fn relations(&self) -> &BTreeSet<String> {
        &self.relations
    }

    pub fn ordering(&self) -> &[OrderTerm] {
        &self.ordering
    }

    pub fn page(&self) -> Option<&PagePlan> {
        self.page.as_ref()
    }

    pub fn target_id(&self) -> Option<&Value> {
        self.target_id.as_ref()
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    /// The caller's specification, kept for continuation descriptors.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }
}
