use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use flexquery::{Caller, PermissionEngine, PolicyStore, QueryRequest, SchemaRegistry};
use serde_json::Value;
use tracing::debug;

#[derive(Args, Clone, Debug)]
pub struct EngineArgs {
    /// Policy file (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub policy: PathBuf,

    /// Schema descriptor file (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub schema: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct RequestArgs {
    /// Caller identity as inline JSON or a file path; anonymous when omitted
    #[arg(long, default_value = "{}")]
    pub caller: String,

    /// Entity to query
    #[arg(long)]
    pub entity: String,

    /// Query request as inline JSON or a file path
    #[arg(default_value = "{}")]
    pub query: String,
}

impl RequestArgs {
    pub fn caller(&self) -> Result<Caller> {
        let value = read_document(&self.caller).context("reading caller")?;
        serde_json::from_value(value).context("parsing caller")
    }

    pub fn request(&self) -> Result<QueryRequest> {
        let value = read_document(&self.query).context("reading query")?;
        serde_json::from_value(value).context("parsing query")
    }
}

pub struct EngineContext {
    policy: Arc<PolicyStore>,
    schema: Arc<SchemaRegistry>,
}

impl EngineContext {
    pub fn load(args: &EngineArgs) -> Result<Self> {
        let schema = SchemaRegistry::load_from_path(&args.schema)
            .with_context(|| format!("loading schema {}", args.schema.display()))?;
        let policy = PolicyStore::load(&args.policy)
            .with_context(|| format!("loading policy {}", args.policy.display()))?;
        debug!(
            policy = %args.policy.display(),
            schema = %args.schema.display(),
            "engine inputs loaded"
        );
        Ok(Self {
            policy: Arc::new(policy),
            schema: Arc::new(schema),
        })
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn schema(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.schema)
    }

    /// Builds the engine, which checks every grant against the schema.
    pub fn engine(&self) -> Result<PermissionEngine> {
        PermissionEngine::new(Arc::clone(&self.policy), self.schema())
            .context("policy does not match schema")
    }
}

/// Inline JSON, or the path of a JSON or YAML file.
pub fn read_document(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("parsing inline JSON");
    }
    let path = Path::new(trimmed);
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(_) => serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display())),
    }
}
