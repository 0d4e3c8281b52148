use anyhow::Result;

use crate::cli::context::CliContext;

pub fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let scheduler = &config.scheduler;

    println!("Taskpilot System Information");
    println!("============================");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", env!("TASKPILOT_BUILD_DATE"));
    println!("Git Commit: {}", env!("TASKPILOT_GIT_HASH"));
    println!();

    println!("Configuration ({}):", ctx.config_path().display());
    println!("- Worker Pool: {}", scheduler.pool_size);
    println!("- Dispatch Interval: {} ms", scheduler.dispatch_interval_ms);
    println!(
        "- Step Timeout: {} ms (command {} ms)",
        scheduler.step_timeout_ms, scheduler.command_timeout_ms
    );
    println!(
        "- Backoff: {} ms doubling up to {} ms",
        scheduler.backoff_base_ms, scheduler.backoff_max_ms
    );
    println!("- Re-plans per Execution: {}", scheduler.max_replans);
    match &config.knowledge.path {
        Some(path) => println!("- Knowledge Store: {}", path.display()),
        None => println!("- Knowledge Store: in memory"),
    }
    match &config.state.snapshot_path {
        Some(path) => println!("- State Snapshot: {}", path.display()),
        None => println!("- State Snapshot: disabled"),
    }
    Ok(())
}
