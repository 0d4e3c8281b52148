use std::fmt;
use std::sync::Arc;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use extensions_bridge::{Command, CommandChannel};
use taskpilot_core_types::{Step, StepResult};

use crate::context::ExecutionContext;
use crate::correlator::StepReply;
use crate::metrics;
use crate::model::SchedulerConfig;

const LOCATE_MARKERS: [&str; 5] = [
    "not found",
    "no such element",
    "stale element",
    "click intercepted",
    "unable to locate",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StepErrorKind {
    /// The command could not be delivered or the reply path vanished.
    Transport,
    Locate,
    Timeout,
    /// The agent reported a structured failure.
    Semantic,
    Cancelled,
}

impl StepErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepErrorKind::Transport => "transport",
            StepErrorKind::Locate => "locate",
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::Semantic => "semantic",
            StepErrorKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies an agent-reported failure by its text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if LOCATE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            StepErrorKind::Locate
        } else {
            StepErrorKind::Semantic
        };
        Self { kind, message }
    }

    pub fn cancelled() -> Self {
        Self::new(StepErrorKind::Cancelled, "cancelled")
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for StepError {}

/// A step that failed after its whole retry budget.
#[derive(Clone, Debug)]
pub struct StepFailure {
    /// The step as last issued, target possibly swapped for the fallback.
    pub step: Step,
    pub error: StepError,
    pub attempts: u32,
    pub fallback_used: bool,
}

/// Issues step commands over the command channel and waits for correlated replies.
pub struct StepRunner {
    channel: Arc<dyn CommandChannel>,
    config: SchedulerConfig,
}

impl StepRunner {
    pub fn new(channel: Arc<dyn CommandChannel>, config: SchedulerConfig) -> Self {
        Self { channel, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// One send-and-wait round trip, no retries.
    pub async fn attempt_once(
        &self,
        ctx: &ExecutionContext,
        step: &Step,
    ) -> Result<StepResult, StepError> {
        let correlator = ctx.correlator();
        let reply_rx = correlator.register(step.step_id);
        let command = Command::for_step(
            ctx.execution_id().clone(),
            step,
            self.config.command_timeout_ms,
        );
        if let Err(err) = self.channel.send_command(ctx.worker_id(), &command) {
            correlator.cancel(step.step_id);
            return Err(StepError::new(StepErrorKind::Transport, err.to_string()));
        }
        debug!(
            target: "scheduler",
            execution = %ctx.execution_id(),
            step = step.step_id,
            action = %step.action,
            "command sent"
        );

        let started = Instant::now();
        match timeout(self.config.reply_deadline(step), reply_rx).await {
            Ok(Ok(reply)) => into_result(step, reply, started.elapsed().as_millis() as u64),
            Ok(Err(_)) => Err(StepError::new(
                StepErrorKind::Transport,
                "reply slot closed before a reply arrived",
            )),
            Err(_) => {
                correlator.cancel(step.step_id);
                Err(StepError::new(
                    StepErrorKind::Timeout,
                    format!("step {} timed out waiting for a reply", step.step_id),
                ))
            }
        }
    }

    /// Runs `step` up to its retry budget with exponential backoff between attempts.
    ///
    /// A locate failure swaps the target for the configured fallback before the next attempt.
    pub async fn run_with_retry(
        &self,
        ctx: &ExecutionContext,
        step: &Step,
    ) -> Result<StepResult, StepFailure> {
        let attempts = step.attempts();
        let mut current = step.clone();
        let mut fallback_used = false;
        let mut attempt = 0;

        loop {
            let error = match self.attempt_once(ctx, &current).await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };
            attempt += 1;
            metrics::record_step_failure(error.kind);
            warn!(
                target: "scheduler",
                execution = %ctx.execution_id(),
                step = current.step_id,
                attempt,
                attempts,
                error = %error,
                "step attempt failed"
            );

            let failure = |error: StepError, step: Step| StepFailure {
                step,
                error,
                attempts: attempt,
                fallback_used,
            };
            if error.kind == StepErrorKind::Transport || attempt >= attempts {
                return Err(failure(error, current));
            }
            if ctx.is_cancelled() {
                return Err(failure(StepError::cancelled(), current));
            }

            sleep(self.config.backoff_for(attempt - 1)).await;
            if ctx.is_cancelled() {
                return Err(failure(StepError::cancelled(), current));
            }

            if error.kind == StepErrorKind::Locate && !fallback_used {
                if let Some(fallback) = step.fallback_target.clone() {
                    info!(
                        target: "scheduler",
                        execution = %ctx.execution_id(),
                        step = current.step_id,
                        fallback = %fallback,
                        "switching to fallback locator"
                    );
                    current.target = Some(fallback);
                    fallback_used = true;
                }
            }
        }
    }
}

fn into_result(step: &Step, reply: StepReply, duration_ms: u64) -> Result<StepResult, StepError> {
    if reply.success {
        let message = reply
            .message
            .unwrap_or_else(|| format!("{} done", step.action));
        Ok(StepResult::success(step.step_id, message).with_duration_ms(duration_ms))
    } else {
        let error = reply
            .error
            .or(reply.message)
            .unwrap_or_else(|| "agent reported failure".to_string());
        Err(StepError::classify(error))
    }
}
