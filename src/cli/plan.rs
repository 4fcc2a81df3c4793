use anyhow::Result;
use clap::Args;

use super::context::{EngineArgs, EngineContext, RequestArgs};

#[derive(Args, Clone, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub request: RequestArgs,

    /// Output JSON instead of human summary
    #[arg(long)]
    pub json: bool,
}

pub async fn cmd_plan(args: PlanArgs) -> Result<()> {
    let context = EngineContext::load(&args.engine)?;
    let engine = context.engine()?;
    let caller = args.request.caller()?;
    let request = args.request.request()?;

    let plan = engine.authorize(&caller, &args.request.entity, &request)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "Plan {} → entity={}, role={}, op={}",
        plan.request_id(),
        plan.entity(),
        plan.role(),
        plan.operation()
    );
    let fields: Vec<String> = plan.projection().paths().map(|path| path.to_string()).collect();
    if !fields.is_empty() {
        println!("Fields → {}", fields.join(", "));
    }
    let lookups: Vec<String> = plan
        .predicate()
        .conditions()
        .iter()
        .map(|condition| condition.lookup.clone())
        .collect();
    if !lookups.is_empty() {
        println!("Predicate lookups → {}", lookups.join(", "));
    }
    if !plan.relations().is_empty() {
        let relations: Vec<&str> = plan.relations().iter().map(String::as_str).collect();
        println!("Eager relations → {}", relations.join(", "));
    }
    if !plan.ordering().is_empty() {
        let ordering: Vec<String> = plan.ordering().iter().map(|term| term.lookup()).collect();
        println!("Ordering → {}", ordering.join(", "));
    }
    if let Some(page) = plan.page() {
        match page.clamped_from {
            Some(requested) => println!(
                "Page → limit={} (clamped from {}), offset={}",
                page.limit, requested, page.offset
            ),
            None => println!("Page → limit={}, offset={}", page.limit, page.offset),
        }
    }
    if let Some(id) = plan.target_id() {
        println!("Target → {}", id);
    }
    Ok(())
}
