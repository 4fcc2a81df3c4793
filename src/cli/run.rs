use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use flexquery::{FlexQuery, MemoryStore};

use super::context::{EngineArgs, EngineContext, RequestArgs};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub request: RequestArgs,

    /// Rows to query, as `{"entity": [row, ...]}` in JSON or YAML
    #[arg(long, value_name = "FILE")]
    pub data: PathBuf,

    /// Print only the response payload
    #[arg(long)]
    pub json: bool,
}

pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let context = EngineContext::load(&args.engine)?;
    let engine = context.engine()?;
    let caller = args.request.caller()?;
    let request = args.request.request()?;

    let store = MemoryStore::load_from_path(context.schema(), &args.data)
        .with_context(|| format!("loading data {}", args.data.display()))?;
    let always_http_200 = engine.settings().always_http_200;
    let flex = FlexQuery::new(Arc::new(engine), Arc::new(store));

    let response = flex.respond(&caller, &args.request.entity, &request).await;
    let payload = response.to_value(always_http_200);

    if !args.json {
        println!(
            "{} {}",
            response.http_status(always_http_200),
            response.code().as_str()
        );
    }
    println!("{}", serde_json::to_string_pretty(&payload)?);

    if !response.is_success() {
        bail!("query failed with {}", response.code().as_str());
    }
    Ok(())
}
