use anyhow::Result;
use clap::Args;
use flexquery::policy::RoleGrant;
use serde_json::{json, Map, Value};

use super::context::{EngineArgs, EngineContext};

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Output JSON instead of human summary
    #[arg(long)]
    pub json: bool,
}

pub async fn cmd_check(args: CheckArgs) -> Result<()> {
    let context = EngineContext::load(&args.engine)?;
    let engine = context.engine()?;
    let policy = context.policy();

    let mut entities = Map::new();
    for (name, config) in policy.entities() {
        let roles: Map<String, Value> = config
            .roles
            .iter()
            .map(|(role, grant)| {
                let ops: Vec<&str> = match grant {
                    RoleGrant::Full => vec!["*"],
                    RoleGrant::Explicit(explicit) => {
                        explicit.ops.iter().map(|op| op.as_str()).collect()
                    }
                };
                (role.clone(), json!(ops))
            })
            .collect();
        entities.insert(
            name.to_string(),
            json!({
                "roles": roles,
                "exclude": config.exclude.iter().map(|path| path.to_string()).collect::<Vec<_>>(),
            }),
        );
    }

    if args.json {
        let payload = json!({
            "valid": true,
            "settings": engine.settings(),
            "entities": entities,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Policy valid: {} entities checked against {} schema entities",
            entities.len(),
            context.schema().len()
        );
        let settings = engine.settings();
        println!(
            "Pagination → default_limit={}, max_limit={}",
            settings.pagination.default_limit, settings.pagination.max_limit
        );
        println!(
            "Security → max_relation_depth={}, trust_forwarded_for={}",
            settings.security.max_relation_depth, settings.security.trust_forwarded_for
        );
        for (name, summary) in &entities {
            let roles = summary["roles"]
                .as_object()
                .map(|roles| roles.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            println!("  {} → roles: {}", name, roles);
        }
    }
    Ok(())
}
