use crate::model::{EngineSettings, PaginationSettings, SecuritySettings};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;
pub const MAX_RELATION_DEPTH: usize = 2;

pub fn default_settings() -> EngineSettings {
    EngineSettings {
        pagination: PaginationSettings {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        },
        security: SecuritySettings {
            max_relation_depth: MAX_RELATION_DEPTH,
            trust_forwarded_for: false,
        },
        rate_limit: None,
        audit_queries: false,
        always_http_200: false,
    }
}
