use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use knowledge_center::{FailureReport, KnowledgeBase, Suggestion};
use taskpilot_core_types::{Step, StepResult};
use taskpilot_planner::{ReplanRequest, Replanner};

use crate::context::ExecutionContext;
use crate::executor::{StepErrorKind, StepFailure, StepRunner};
use crate::metrics;
use crate::model::SchedulerConfig;

#[derive(Clone, Debug)]
pub enum RecoveryOutcome {
    /// A corrected step succeeded; its result stands in for the failed step.
    Fixed(StepResult),
    /// Replacement steps for the unexecuted remainder, starting at the failed step.
    Replanned(Vec<Step>),
    Exhausted,
}

/// Post-retry recovery chain: knowledge lookup, configured fallback, then re-plan.
pub struct RecoveryPolicy {
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    replanner: Option<Arc<dyn Replanner>>,
    config: SchedulerConfig,
}

impl RecoveryPolicy {
    pub fn new(
        knowledge: Option<Arc<dyn KnowledgeBase>>,
        replanner: Option<Arc<dyn Replanner>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            knowledge,
            replanner,
            config,
        }
    }

    pub async fn recover(
        &self,
        runner: &StepRunner,
        ctx: &ExecutionContext,
        original: &Step,
        failure: &StepFailure,
    ) -> RecoveryOutcome {
        if matches!(
            failure.error.kind,
            StepErrorKind::Transport | StepErrorKind::Cancelled
        ) {
            return RecoveryOutcome::Exhausted;
        }
        let report = FailureReport::new(failure.error.kind.as_str(), failure.error.message.clone());
        let current_url = ctx.current_url();

        if let Some(result) = self
            .try_knowledge(runner, ctx, original, &report, current_url.as_deref())
            .await
        {
            metrics::record_recovery("knowledge");
            return RecoveryOutcome::Fixed(result);
        }
        if ctx.is_cancelled() {
            return RecoveryOutcome::Exhausted;
        }

        if let Some(result) = self.try_fallback(runner, ctx, original, failure).await {
            metrics::record_recovery("fallback");
            return RecoveryOutcome::Fixed(result);
        }
        if ctx.is_cancelled() {
            return RecoveryOutcome::Exhausted;
        }

        if let Some(steps) = self.try_replan(ctx, original, failure, current_url).await {
            metrics::record_recovery("replan");
            return RecoveryOutcome::Replanned(steps);
        }
        RecoveryOutcome::Exhausted
    }

    async fn try_knowledge(
        &self,
        runner: &StepRunner,
        ctx: &ExecutionContext,
        original: &Step,
        report: &FailureReport,
        current_url: Option<&str>,
    ) -> Option<StepResult> {
        let knowledge = self.knowledge.as_ref()?;
        let suggestion = knowledge.find_solution(report, original, current_url).await?;
        info!(
            target: "scheduler",
            execution = %ctx.execution_id(),
            step = original.step_id,
            ?suggestion,
            "applying known fix"
        );

        let corrected = match &suggestion {
            Suggestion::AlternateLocator { selector } => {
                let mut step = original.clone().with_target(selector.clone()).with_retry_count(1);
                step.description = format!("{} [fixed]", original.description);
                step
            }
            Suggestion::InsertWait { seconds } => {
                sleep(Duration::from_secs(u64::from(*seconds))).await;
                original.clone()
            }
        };
        if ctx.is_cancelled() {
            return None;
        }

        match runner.attempt_once(ctx, &corrected).await {
            Ok(result) => {
                knowledge
                    .record_outcome(report, original, &suggestion, current_url)
                    .await;
                Some(result)
            }
            Err(err) => {
                debug!(target: "scheduler", step = original.step_id, %err, "known fix did not help");
                None
            }
        }
    }

    async fn try_fallback(
        &self,
        runner: &StepRunner,
        ctx: &ExecutionContext,
        original: &Step,
        failure: &StepFailure,
    ) -> Option<StepResult> {
        if failure.fallback_used {
            return None;
        }
        let fallback = original.fallback_target.as_deref()?;
        if original.target.as_deref() == Some(fallback) {
            return None;
        }
        let step = original.clone().with_target(fallback);
        match runner.attempt_once(ctx, &step).await {
            Ok(result) => Some(result),
            Err(err) => {
                debug!(target: "scheduler", step = original.step_id, %err, "fallback locator failed");
                None
            }
        }
    }

    async fn try_replan(
        &self,
        ctx: &ExecutionContext,
        original: &Step,
        failure: &StepFailure,
        current_url: Option<String>,
    ) -> Option<Vec<Step>> {
        let replanner = self.replanner.as_ref()?;
        if !self.config.wants_replan(&failure.error.message) {
            return None;
        }
        if ctx.replans() >= self.config.max_replans {
            warn!(
                target: "scheduler",
                execution = %ctx.execution_id(),
                replans = ctx.replans(),
                "re-plan budget spent"
            );
            return None;
        }

        let request = ReplanRequest {
            original_description: ctx.original_description().to_string(),
            completed: ctx.results(),
            failing: StepResult::failure(original.step_id, failure.error.message.clone()),
            current_url,
        };
        let steps = replanner.replan(&request).await;
        if steps.is_empty() {
            return None;
        }
        info!(
            target: "scheduler",
            execution = %ctx.execution_id(),
            from = original.step_id,
            steps = steps.len(),
            "remaining steps re-planned"
        );
        Some(steps)
    }
}
