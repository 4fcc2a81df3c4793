use clap::Subcommand;

use super::check::CheckArgs;
use super::plan::PlanArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Validate a policy file against a schema descriptor
    Check(CheckArgs),

    /// Authorize a query and print the compiled plan
    Plan(PlanArgs),

    /// Execute a query against rows loaded from a data file
    Run(RunArgs),
}
