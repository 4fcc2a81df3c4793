use std::time::SystemTime;

use flexquery_core_types::{ErrorKind, FlexError, OperationKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

/// Emitted once per authorization attempt, allowed or not.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub request_id: Uuid,
    pub entity: String,
    pub role: Option<String>,
    pub operation: Option<OperationKind>,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Denied subject or error text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub timestamp: SystemTime,
}

impl AuditEvent {
    pub(crate) fn new(request_id: Uuid, entity: &str) -> Self {
        Self {
            request_id,
            entity: entity.to_string(),
            role: None,
            operation: None,
            decision: Decision::Allow,
            error_kind: None,
            subject: None,
            timestamp: SystemTime::now(),
        }
    }

    pub(crate) fn denied(mut self, err: &FlexError) -> Self {
        self.decision = Decision::Deny;
        self.error_kind = Some(err.kind());
        self.subject = Some(match err {
            FlexError::PermissionDenied { subject, .. } => subject.clone(),
            other => other.to_string(),
        });
        self
    }
}

pub(crate) struct AuditTrail {
    events: broadcast::Sender<AuditEvent>,
    verbose: bool,
}

impl AuditTrail {
    pub(crate) fn new(capacity: usize, verbose: bool) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { events: tx, verbose }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: AuditEvent) {
        self.log(&event);
        if self.events.receiver_count() == 0 {
            return;
        }
        if let Err(err) = self.events.send(event) {
            warn!(
                target = "flexquery::audit",
                "failed to publish audit event: {err}"
            );
        }
    }

    fn log(&self, event: &AuditEvent) {
        let role = event.role.as_deref().unwrap_or("-");
        let op = event.operation.map(|op| op.as_str()).unwrap_or("-");
        let subject = event.subject.as_deref().unwrap_or("");
        match (event.decision, event.error_kind) {
            (_, Some(ErrorKind::Internal)) => error!(
                request_id = %event.request_id,
                entity = %event.entity,
                role = %role,
                op = %op,
                "authorization failed: {subject}"
            ),
            (Decision::Allow, _) if self.verbose => info!(
                request_id = %event.request_id,
                entity = %event.entity,
                role = %role,
                op = %op,
                "query allowed"
            ),
            (Decision::Deny, _) if self.verbose => info!(
                request_id = %event.request_id,
                entity = %event.entity,
                role = %role,
                op = %op,
                kind = ?event.error_kind,
                "query denied: {subject}"
            ),
            (decision, _) => debug!(
                request_id = %event.request_id,
                entity = %event.entity,
                role = %role,
                op = %op,
                ?decision,
                "authorization decided"
            ),
        }
    }
}
