use super::check::cmd_check;
use super::env::CliArgs;
use super::plan::cmd_plan;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs) -> Result<()> {
    match cli.command.clone() {
        Commands::Check(args) => cmd_check(args).await,
        Commands::Plan(args) => cmd_plan(args).await,
        Commands::Run(args) => cmd_run(args).await,
    }
}
