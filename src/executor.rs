//! Runs authorized plans against a [`StoreAdapter`].

use std::sync::Arc;

use flexquery_core_types::{Caller, FlexError, FlexResult, OperationKind};
use flexquery_permissions_broker::{PermissionEngine, QueryPlan};
use flexquery_query_compiler::{encode_continuation, shape_row, PageInfo, QueryRequest};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::response::FlexResponse;
use crate::store::{id_text, Row, StoreAdapter, StoreError, StoreQuery};

/// Result of one executed request, before it is rendered as a payload.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutcome {
    Object(Map<String, Value>),
    Page {
        /// Shaped rows keyed by primary key, in result order.
        results: Map<String, Value>,
        pagination: PageInfo,
        /// Set when the requested limit was clamped.
        requested_limit: Option<u64>,
    },
    Created {
        id: Value,
        object: Map<String, Value>,
    },
    Updated {
        id: Value,
        object: Map<String, Value>,
    },
    Deleted {
        id: Value,
    },
}

impl QueryOutcome {
    pub fn into_response(self) -> FlexResult<FlexResponse> {
        let response = match self {
            QueryOutcome::Object(object) => FlexResponse::ok(object),
            QueryOutcome::Page {
                results,
                pagination,
                requested_limit,
            } => FlexResponse::query(results, pagination_value(&pagination)?, requested_limit),
            QueryOutcome::Created { id, .. } => {
                let mut data = Map::new();
                data.insert("id".into(), id);
                FlexResponse::created(data)
            }
            QueryOutcome::Updated { id, .. } => {
                let mut data = Map::new();
                data.insert("id".into(), id);
                data.insert("updated".into(), Value::Bool(true));
                FlexResponse::ok(data)
            }
            QueryOutcome::Deleted { id } => {
                let mut data = Map::new();
                data.insert("id".into(), id);
                data.insert("deleted".into(), Value::Bool(true));
                FlexResponse::ok(data)
            }
        };
        Ok(response)
    }
}

/// Pagination block with the opaque `next_token` alongside `next`.
fn pagination_value(info: &PageInfo) -> FlexResult<Value> {
    let mut value = serde_json::to_value(info)
        .map_err(|err| FlexError::internal(format!("pagination encode failed: {err}")))?;
    if let (Some(next), Value::Object(map)) = (&info.next, &mut value) {
        map.insert("next_token".into(), Value::String(encode_continuation(next)?));
    }
    Ok(value)
}

/// Permission engine and store wired together.
#[derive(Clone)]
pub struct FlexQuery {
    engine: Arc<PermissionEngine>,
    store: Arc<dyn StoreAdapter>,
}

impl FlexQuery {
    pub fn new(engine: Arc<PermissionEngine>, store: Arc<dyn StoreAdapter>) -> Self {
        Self { engine, store }
    }

    pub fn engine(&self) -> &PermissionEngine {
        &self.engine
    }

    /// Authorizes `request`, runs it and renders the payload. Failures become error payloads.
    pub async fn respond(&self, caller: &Caller, entity: &str, request: &QueryRequest) -> FlexResponse {
        let outcome = match self.execute(caller, entity, request).await {
            Ok(outcome) => outcome.into_response(),
            Err(err) => Err(err),
        };
        outcome.unwrap_or_else(|err| {
            if let FlexError::Internal(detail) = &err {
                error!(entity = %entity, error = %detail, "query failed");
            }
            FlexResponse::from_error(&err)
        })
    }

    pub async fn execute(
        &self,
        caller: &Caller,
        entity: &str,
        request: &QueryRequest,
    ) -> FlexResult<QueryOutcome> {
        let plan = self.engine.authorize(caller, entity, request)?;
        self.execute_plan(&plan).await
    }

    pub async fn execute_plan(&self, plan: &QueryPlan) -> FlexResult<QueryOutcome> {
        let outcome = match plan.operation() {
            OperationKind::Get => self.get(plan).await?,
            OperationKind::List => self.list(plan).await?,
            OperationKind::Create => self.create(plan).await?,
            OperationKind::Update => self.update(plan).await?,
            OperationKind::Delete => self.delete(plan).await?,
        };
        debug!(
            entity = %plan.entity(),
            role = %plan.role(),
            op = %plan.operation(),
            request_id = %plan.request_id(),
            "query executed"
        );
        Ok(outcome)
    }

    fn primary_key(&self, entity: &str) -> String {
        self.engine
            .schema()
            .entity(entity)
            .map(|schema| schema.primary_key.clone())
            .unwrap_or_else(|| "id".to_string())
    }

    async fn get(&self, plan: &QueryPlan) -> FlexResult<QueryOutcome> {
        let id = target_id(plan)?;
        let rows = self
            .store
            .fetch(StoreQuery {
                entity: plan.entity(),
                predicate: plan.predicate(),
                ordering: &[],
                id: Some(id),
                limit: Some(1),
                offset: 0,
                relations: plan.relations(),
            })
            .await
            .map_err(|err| store_failure(plan, err))?;
        let row = rows.into_iter().next().ok_or(FlexError::NotFound)?;
        Ok(QueryOutcome::Object(shape_row(&row, plan.projection())))
    }

    async fn list(&self, plan: &QueryPlan) -> FlexResult<QueryOutcome> {
        let page = plan
            .page()
            .copied()
            .ok_or_else(|| FlexError::internal("list plan without a page"))?;
        let mut rows = self
            .store
            .fetch(StoreQuery {
                entity: plan.entity(),
                predicate: plan.predicate(),
                ordering: plan.ordering(),
                id: None,
                limit: Some(page.fetch_limit()),
                offset: page.offset,
                relations: plan.relations(),
            })
            .await
            .map_err(|err| store_failure(plan, err))?;

        let limit = page.limit as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let primary_key = self.primary_key(plan.entity());
        let mut results = Map::new();
        for row in &rows {
            let Some(id) = row.get(&primary_key).filter(|id| !id.is_null()) else {
                warn!(
                    entity = %plan.entity(),
                    primary_key = %primary_key,
                    request_id = %plan.request_id(),
                    "skipping row without a primary key"
                );
                continue;
            };
            results.insert(id_text(id), Value::Object(shape_row(row, plan.projection())));
        }
        Ok(QueryOutcome::Page {
            results,
            pagination: page.page_info(has_more, plan.spec()),
            requested_limit: page.clamped_from,
        })
    }

    async fn create(&self, plan: &QueryPlan) -> FlexResult<QueryOutcome> {
        let data = write_data(plan)?;
        let row = self
            .store
            .insert(plan.entity(), data)
            .await
            .map_err(|err| store_failure(plan, err))?;
        let id = row
            .get(&self.primary_key(plan.entity()))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(QueryOutcome::Created {
            id,
            object: shape_row(&row, plan.projection()),
        })
    }

    async fn update(&self, plan: &QueryPlan) -> FlexResult<QueryOutcome> {
        let id = target_id(plan)?;
        let data = write_data(plan)?;
        let row = self
            .store
            .update(plan.entity(), plan.predicate(), id, data)
            .await
            .map_err(|err| store_failure(plan, err))?
            .ok_or(FlexError::NotFound)?;
        Ok(QueryOutcome::Updated {
            id: id.clone(),
            object: shape_row(&row, plan.projection()),
        })
    }

    async fn delete(&self, plan: &QueryPlan) -> FlexResult<QueryOutcome> {
        let id = target_id(plan)?;
        let deleted = self
            .store
            .delete(plan.entity(), plan.predicate(), id)
            .await
            .map_err(|err| store_failure(plan, err))?;
        if !deleted {
            return Err(FlexError::NotFound);
        }
        Ok(QueryOutcome::Deleted { id: id.clone() })
    }
}

fn target_id(plan: &QueryPlan) -> FlexResult<&Value> {
    plan.target_id()
        .ok_or_else(|| FlexError::internal(format!("{} plan without a target id", plan.operation())))
}

fn write_data(plan: &QueryPlan) -> FlexResult<Row> {
    plan.data()
        .cloned()
        .ok_or_else(|| FlexError::internal(format!("{} plan without data", plan.operation())))
}

fn store_failure(plan: &QueryPlan, err: StoreError) -> FlexError {
    error!(
        entity = %plan.entity(),
        op = %plan.operation(),
        request_id = %plan.request_id(),
        error = %err,
        "store adapter failed"
    );
    FlexError::from(err)
}
