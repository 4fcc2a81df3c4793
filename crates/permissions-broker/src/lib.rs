//! Permission engine: role resolution, grant evaluation, rate limiting and
//! audit events around the pure compilation stages of the query compiler.

mod audit;
mod engine;
mod plan;
mod rate_limit;
mod resolver;

pub use audit::{AuditEvent, Decision};
pub use engine::{EffectiveGrant, PermissionEngine, PermissionEngineBuilder};
pub use plan::QueryPlan;
pub use rate_limit::{resolve_limit, RateLimiter};
pub use resolver::{
    ResolverError, RoleAssignment, RoleResolver, ROLE_ANON, ROLE_AUTHENTICATED, ROLE_STAFF,
    ROLE_SUPERUSER,
};
