//! flexquery library
//!
//! Store adapters, the request executor and response payloads on top of the
//! permission engine. Member crates are re-exported for hosts that only
//! depend on this one.

pub mod executor;
pub mod memory_store;
pub mod response;
pub mod store;

pub use flexquery_core_types as core_types;
pub use flexquery_permissions_broker as permissions;
pub use flexquery_policy_center as policy;
pub use flexquery_query_compiler as compiler;

pub use executor::{FlexQuery, QueryOutcome};
pub use memory_store::MemoryStore;
pub use response::{FlexResponse, ResponseCode};
pub use store::{Row, StoreAdapter, StoreError, StoreQuery};

// Re-export commonly used types for external use
pub use flexquery_core_types::{
    Caller, DenialKind, EntitySchema, ErrorKind, FlexError, FlexResult, OperationKind,
    SchemaDescriptor, SchemaRegistry,
};
pub use flexquery_permissions_broker::{AuditEvent, PermissionEngine, QueryPlan, RoleResolver};
pub use flexquery_policy_center::{EngineSettings, PolicyStore};
pub use flexquery_query_compiler::{QueryRequest, QuerySpec};
