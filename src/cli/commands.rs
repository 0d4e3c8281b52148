use clap::Subcommand;

use super::config::ConfigArgs;
use super::plan::PlanArgs;
use super::simulate::SimulateArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Turn a natural-language request into a step plan
    Plan(PlanArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),

    /// Execute a task file against an in-process simulated agent
    Simulate(SimulateArgs),

    /// Show version, build and configuration summary
    Info,

    /// Print scheduler and registry metrics in the Prometheus text format
    Metrics,
}
