use anyhow::Result;
use clap::Args;
use serde_json::json;
use tracing::info;

use taskpilot_planner::LlmPlanner;

use super::context::CliContext;
use super::output::print_structured;

#[derive(Args, Clone, Debug)]
pub struct PlanArgs {
    /// Natural-language request, e.g. "open https://example.com and click #login"
    pub text: String,

    /// Cap on the number of generated steps
    #[arg(long)]
    pub max_steps: Option<usize>,
}

pub async fn cmd_plan(args: PlanArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().planner.clone();
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    let outcome = LlmPlanner::rules_only(config)
        .generate_plan(&args.text)
        .await;
    info!(
        source = ?outcome.source,
        steps = outcome.task.steps.len(),
        "plan generated"
    );

    let payload = json!({
        "source": outcome.source,
        "explanations": outcome.explanations,
        "task": outcome.task,
    });
    if print_structured(ctx.output(), &payload)? {
        return Ok(());
    }

    println!(
        "Plan: {} ({} steps)",
        outcome.task.name,
        outcome.task.steps.len()
    );
    for step in &outcome.task.steps {
        let detail = step
            .target
            .as_deref()
            .or(step.value.as_deref())
            .unwrap_or("-");
        println!("  {:>2}. {:<9} {}", step.step_id, step.action, detail);
    }
    for note in &outcome.explanations {
        println!("  - {note}");
    }
    Ok(())
}
