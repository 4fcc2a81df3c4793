use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::grants::PolicyConfig;

/// Process-wide engine settings. Built once, then passed by reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub pagination: PaginationSettings,
    pub security: SecuritySettings,
    /// Global requests-per-minute limit, the last rung of rate limit precedence.
    pub rate_limit: Option<u32>,
    pub audit_queries: bool,
    pub always_http_200: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationSettings {
    pub default_limit: u32,
    pub max_limit: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub max_relation_depth: usize,
    pub trust_forwarded_for: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        crate::defaults::default_settings()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SettingSource {
    Builtin,
    File,
    Env,
}

/// Everything a policy file declares, after overlays have been applied.
#[derive(Clone, Debug, Default)]
pub struct PolicyDocument {
    pub settings: EngineSettings,
    pub entities: BTreeMap<String, PolicyConfig>,
    pub provenance: BTreeMap<String, SettingSource>,
}

impl PolicyDocument {
    pub fn with_entity(mut self, name: impl Into<String>, config: PolicyConfig) -> Self {
        self.entities.insert(name.into(), config);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn set_provenance(&mut self, path: &str, source: SettingSource) {
        self.provenance.insert(path.to_string(), source);
    }
}
