use tokio::time::sleep;
use tracing::{debug, info, warn};

use taskpilot_core_types::{ExecutionStatus, StepResult};

use crate::context::ExecutionContext;
use crate::executor::{StepErrorKind, StepRunner};
use crate::recovery::{RecoveryOutcome, RecoveryPolicy};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriveOutcome {
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

impl DriveOutcome {
    fn completed() -> Self {
        Self {
            status: ExecutionStatus::Completed,
            error: None,
        }
    }

    fn cancelled() -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            error: Some("cancelled".to_string()),
        }
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Walks an execution's steps strictly in order until it completes, fails or is cancelled.
pub struct ExecutionDriver {
    runner: StepRunner,
    recovery: RecoveryPolicy,
}

impl ExecutionDriver {
    pub fn new(runner: StepRunner, recovery: RecoveryPolicy) -> Self {
        Self { runner, recovery }
    }

    pub async fn drive(&self, ctx: &ExecutionContext) -> DriveOutcome {
        loop {
            if ctx.is_cancelled() {
                return DriveOutcome::cancelled();
            }
            let Some((index, step)) = ctx.current_step() else {
                info!(
                    target: "scheduler",
                    execution = %ctx.execution_id(),
                    steps = ctx.results().len(),
                    "all steps finished"
                );
                return DriveOutcome::completed();
            };

            if index > 0 && step.action.is_page_transition() {
                sleep(self.runner.config().settle_delay()).await;
                if ctx.is_cancelled() {
                    return DriveOutcome::cancelled();
                }
            }
            debug!(
                target: "scheduler",
                execution = %ctx.execution_id(),
                step = step.step_id,
                index,
                action = %step.action,
                "running step"
            );

            let failure = match self.runner.run_with_retry(ctx, &step).await {
                Ok(result) => {
                    ctx.record_result(result);
                    continue;
                }
                Err(failure) => failure,
            };
            if failure.error.kind == StepErrorKind::Cancelled || ctx.is_cancelled() {
                return DriveOutcome::cancelled();
            }

            match self.recovery.recover(&self.runner, ctx, &step, &failure).await {
                RecoveryOutcome::Fixed(result) => ctx.record_result(result),
                RecoveryOutcome::Replanned(steps) => {
                    ctx.apply_replan(StepResult::success(step.step_id, "re-planned"), steps)
                }
                RecoveryOutcome::Exhausted => {
                    if ctx.is_cancelled() {
                        return DriveOutcome::cancelled();
                    }
                    warn!(
                        target: "scheduler",
                        execution = %ctx.execution_id(),
                        step = step.step_id,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "step failed after recovery"
                    );
                    return DriveOutcome::failed(failure.error.message);
                }
            }
        }
    }
}
