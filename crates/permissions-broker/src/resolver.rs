//! Maps a caller to the role whose grants apply on one entity.

use flexquery_core_types::{Caller, FlexError};
use flexquery_policy_center::RowSource;
use thiserror::Error;

pub const ROLE_ANON: &str = "anon";
pub const ROLE_AUTHENTICATED: &str = "authenticated";
pub const ROLE_STAFF: &str = "staff";
pub const ROLE_SUPERUSER: &str = "superuser";

/// Outcome of role resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct RoleAssignment {
    pub role: String,
    /// Default row scope, used only when the policy declares no `rows`.
    pub row_scope: Option<RowSource>,
    /// Skip the policy store entirely and grant everything.
    pub bypass: bool,
}

impl RoleAssignment {
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: role.into().trim().to_ascii_lowercase(),
            row_scope: None,
            bypass: false,
        }
    }

    pub fn scoped(role: impl Into<String>, rows: RowSource) -> Self {
        Self {
            row_scope: Some(rows),
            ..Self::role(role)
        }
    }

    pub(crate) fn superuser() -> Self {
        Self {
            bypass: true,
            ..Self::role(ROLE_SUPERUSER)
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("role resolver failed: {0}")]
pub struct ResolverError(pub String);

impl From<ResolverError> for FlexError {
    fn from(err: ResolverError) -> Self {
        FlexError::internal(err.to_string())
    }
}

/// Host-supplied role lookup, consulted before the built-in chain.
///
/// Returning `Ok(None)` falls through to the built-in chain.
pub trait RoleResolver: Send + Sync {
    fn resolve(&self, caller: &Caller, entity: &str)
        -> Result<Option<RoleAssignment>, ResolverError>;
}

/// Anonymous callers are always `anon` and never reach a custom resolver.
pub(crate) fn resolve_role(
    caller: &Caller,
    entity: &str,
    custom: Option<&dyn RoleResolver>,
) -> Result<RoleAssignment, ResolverError> {
    if caller.is_anonymous() {
        return Ok(RoleAssignment::role(ROLE_ANON));
    }
    if let Some(resolver) = custom {
        if let Some(mut assignment) = resolver.resolve(caller, entity)? {
            assignment.role = assignment.role.trim().to_ascii_lowercase();
            if !assignment.role.is_empty() {
                return Ok(assignment);
            }
        }
    }
    Ok(default_role(caller))
}

fn default_role(caller: &Caller) -> RoleAssignment {
    if caller.superuser {
        return RoleAssignment::superuser();
    }
    if caller.staff {
        return RoleAssignment::role(ROLE_STAFF);
    }
    match caller.groups.iter().map(|g| g.trim()).find(|g| !g.is_empty()) {
        Some(group) => RoleAssignment::role(group),
        None => RoleAssignment::role(ROLE_AUTHENTICATED),
    }
}
