pub mod defaults;
pub mod errors;
pub mod grants;
pub mod loader;
pub mod model;
mod overlay;
pub mod store;

pub use defaults::default_settings;
pub use errors::PolicyError;
pub use grants::{
    ExplicitGrant, FieldGrant, KeyGrant, PolicyConfig, RateLimitSpec, RoleGrant, RowSource,
    RowTemplate, CALLER_PLACEHOLDER,
};
pub use loader::{load_document, load_document_with_options, parse_document, LoadOptions};
pub use model::{
    EngineSettings, PaginationSettings, PolicyDocument, SecuritySettings, SettingSource,
};
pub use store::PolicyStore;

#[cfg(test)]
mod tests;
