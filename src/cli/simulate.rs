use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};

use taskpilot::{AppContext, SimulatedAgent};
use taskpilot_core_types::{StepId, TaskDefinition, TaskPriority, UserId};
use taskpilot_scheduler::TaskSource;
use taskpilot_state_center::ExecutionSummary;

use super::context::CliContext;
use super::output::print_structured;

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Task definition in JSON (`name`, `description`, `steps`)
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Step id the simulated agent always fails with "element not found"
    #[arg(long)]
    pub fail_step: Option<StepId>,

    /// Worker id the simulated agent registers under
    #[arg(long, default_value = "simulated-worker")]
    pub worker: String,

    /// User the task is submitted for
    #[arg(long)]
    pub user: Option<String>,

    /// Queue priority
    #[arg(long, default_value_t = TaskPriority::Normal.value())]
    pub priority: u32,

    /// Simulated agent response latency in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,
}

pub async fn cmd_simulate(args: SimulateArgs, ctx: &CliContext) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read task file {}", args.file.display()))?;
    let task: TaskDefinition = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse task file {}", args.file.display()))?;
    if task.steps.is_empty() {
        bail!("task {} has no steps", task.name);
    }

    let app = AppContext::new(ctx.config().clone())?;
    let user = args
        .user
        .as_deref()
        .map(UserId::from)
        .unwrap_or_else(UserId::anonymous);

    let mut agent = SimulatedAgent::new(args.worker.as_str())
        .with_user(user.clone())
        .with_latency(Duration::from_millis(args.latency_ms));
    if let Some(step) = args.fail_step {
        agent = agent.failing_step(step);
    }
    let worker = agent.worker().clone();
    let agent_handle = agent.spawn(app.gateway());

    let execution_id = app
        .scheduler()
        .submit(TaskSource::Inline(task), user, args.priority)
        .await?;
    info!(execution = %execution_id, %worker, "task submitted to simulated agent");

    let state = app.state_center();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let summary = loop {
        if let Some(summary) = state.execution(&execution_id) {
            break Some(summary);
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    if summary.is_none() {
        warn!(execution = %execution_id, "timed out, cancelling");
        app.scheduler().cancel(&execution_id).await;
    }
    app.gateway().disconnect(&worker);
    match agent_handle.await {
        Ok(answered) => info!(answered, "simulated agent stopped"),
        Err(err) => warn!(?err, "simulated agent ended abnormally"),
    }
    app.shutdown().await;

    let Some(summary) = summary else {
        bail!(
            "execution {} did not finish within {}s",
            execution_id,
            args.timeout_secs
        );
    };
    if !print_structured(ctx.output(), &summary)? {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &ExecutionSummary) {
    println!(
        "Execution {} [{}] {}",
        summary.execution_id,
        summary.status.as_str(),
        summary.task_name
    );
    println!(
        "  steps: {}/{} succeeded, re-plans: {}, {} ms",
        summary.succeeded_steps(),
        summary.results.len(),
        summary.replans,
        summary.duration_ms
    );
    for result in &summary.results {
        let mark = if result.success { "ok " } else { "ERR" };
        let detail = result
            .error
            .as_deref()
            .or(result.message.as_deref())
            .unwrap_or("");
        println!("  {mark} step {:>2} {}", result.step_id, detail);
    }
    if let Some(error) = &summary.error {
        println!("  error: {error}");
    }
}
