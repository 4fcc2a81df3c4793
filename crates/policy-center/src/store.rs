use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use flexquery_core_types::{FieldPath, SchemaDescriptor};
use tracing::warn;

use crate::errors::PolicyError;
use crate::grants::{PolicyConfig, RoleGrant};
use crate::loader::load_document;
use crate::model::{EngineSettings, PolicyDocument, SettingSource};

/// Read-only policy lookup. Entity and role names are case-insensitive.
#[derive(Clone, Debug)]
pub struct PolicyStore {
    settings: EngineSettings,
    entities: BTreeMap<String, PolicyConfig>,
    provenance: BTreeMap<String, SettingSource>,
}

impl PolicyStore {
    pub fn new(document: PolicyDocument) -> Result<Self, PolicyError> {
        validate_settings(&document.settings)?;

        let mut entities = BTreeMap::new();
        for (name, mut config) in document.entities {
            let key = name.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(PolicyError::Invalid("empty entity name".into()));
            }
            let mut roles = BTreeMap::new();
            for (role, grant) in std::mem::take(&mut config.roles) {
                let role_key = role.trim().to_ascii_lowercase();
                if roles.insert(role_key.clone(), grant).is_some() {
                    return Err(PolicyError::Invalid(format!(
                        "role '{role_key}' declared twice on entity '{key}'"
                    )));
                }
            }
            config.roles = roles;
            if entities.insert(key.clone(), config).is_some() {
                return Err(PolicyError::Invalid(format!(
                    "entity '{key}' declared twice"
                )));
            }
        }

        Ok(Self {
            settings: document.settings,
            entities,
            provenance: document.provenance,
        })
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        Self::new(load_document(Some(path))?)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn entity(&self, name: &str) -> Option<&PolicyConfig> {
        self.entities.get(&name.to_ascii_lowercase())
    }

    /// `None` when the entity or the role is absent: deny by default.
    pub fn grant(&self, entity: &str, role: &str) -> Option<&RoleGrant> {
        self.entity(entity)?.roles.get(&role.to_ascii_lowercase())
    }

    pub fn exclude(&self, entity: &str) -> Option<&BTreeSet<FieldPath>> {
        self.entity(entity).map(|config| &config.exclude)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&str, &PolicyConfig)> {
        self.entities
            .iter()
            .map(|(name, config)| (name.as_str(), config))
    }

    pub fn provenance(&self, setting: &str) -> Option<SettingSource> {
        self.provenance.get(setting).copied()
    }

    /// Entities and exclusions must exist in the schema.
    pub fn check_schema(&self, schema: &dyn SchemaDescriptor) -> Result<(), PolicyError> {
        for (name, config) in &self.entities {
            let Some(entity) = schema.entity(name) else {
                return Err(PolicyError::UnknownEntity(name.clone()));
            };
            for path in &config.exclude {
                if entity.classify(path.first()).is_none() {
                    return Err(PolicyError::Invalid(format!(
                        "entity '{name}' excludes unknown member '{path}'"
                    )));
                }
            }
            if config.roles.is_empty() {
                warn!(entity = %name, "entity has no roles, every request will be denied");
            }
        }
        Ok(())
    }
}

fn validate_settings(settings: &EngineSettings) -> Result<(), PolicyError> {
    let pagination = &settings.pagination;
    if pagination.default_limit < 1 {
        return Err(PolicyError::InvalidValue(
            "pagination.default_limit must be at least 1".into(),
        ));
    }
    if pagination.max_limit < pagination.default_limit {
        return Err(PolicyError::InvalidValue(format!(
            "pagination.max_limit ({}) is below pagination.default_limit ({})",
            pagination.max_limit, pagination.default_limit
        )));
    }
    Ok(())
}
