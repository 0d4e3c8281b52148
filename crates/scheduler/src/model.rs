use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskpilot_core_types::{
    ExecutionId, ExecutionStatus, Step, StepAction, TaskDefinition, TaskId, UserId, WorkerId,
};

/// Priority used by `run_now`, above anything a caller can submit with a named priority.
pub const IMMEDIATE_PRIORITY: u32 = u32::MAX;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of executions driven concurrently.
    pub pool_size: usize,
    pub dispatch_interval_ms: u64,
    /// Timeout the agent is told to apply to a command.
    pub command_timeout_ms: u64,
    /// How long the coordinator waits for a correlated reply.
    pub step_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Pause before navigate/click steps that follow another step.
    pub settle_delay_ms: u64,
    pub max_replans: u32,
    pub replan_markers: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            dispatch_interval_ms: 1_000,
            command_timeout_ms: 10_000,
            step_timeout_ms: 15_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            settle_delay_ms: 500,
            max_replans: 2,
            replan_markers: vec![
                "flow interrupted".to_string(),
                "page structure changed".to_string(),
            ],
        }
    }
}

impl SchedulerConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Backoff after the zero-based `attempt` failed: base doubled per attempt, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms.max(self.backoff_base_ms));
        Duration::from_millis(millis)
    }

    /// Reply deadline for one attempt; wait steps get their own duration on top.
    pub fn reply_deadline(&self, step: &Step) -> Duration {
        let extra_ms = match step.action {
            StepAction::Wait => u64::from(step.wait_time.unwrap_or(0)) * 1_000,
            _ => 0,
        };
        Duration::from_millis(self.step_timeout_ms.saturating_add(extra_ms))
    }

    pub fn wants_replan(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.replan_markers
            .iter()
            .any(|marker| !marker.is_empty() && lower.contains(&marker.to_lowercase()))
    }
}

/// Where a submitted task's definition comes from.
#[derive(Clone, Debug)]
pub enum TaskSource {
    Stored(TaskId),
    Inline(TaskDefinition),
}

impl From<TaskDefinition> for TaskSource {
    fn from(task: TaskDefinition) -> Self {
        TaskSource::Inline(task)
    }
}

impl From<TaskId> for TaskSource {
    fn from(id: TaskId) -> Self {
        TaskSource::Stored(id)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Pending,
    Assigned,
}

/// A task waiting in the pending queue.
#[derive(Clone, Debug)]
pub struct ScheduledTask {
    pub execution_id: ExecutionId,
    pub task: TaskDefinition,
    pub user_id: UserId,
    pub priority: u32,
    pub submitted_at: DateTime<Utc>,
    pub status: AssignmentStatus,
    pub worker_id: Option<WorkerId>,
}

impl ScheduledTask {
    pub fn new(task: TaskDefinition, user_id: UserId, priority: u32) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            task,
            user_id,
            priority,
            submitted_at: Utc::now(),
            status: AssignmentStatus::Pending,
            worker_id: None,
        }
    }

    pub fn assign(&mut self, worker: WorkerId) {
        self.status = AssignmentStatus::Assigned;
        self.worker_id = Some(worker);
    }
}

/// Point-in-time view of an execution for status queries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub current_url: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub worker_id: Option<WorkerId>,
    pub user_id: UserId,
}

impl ExecutionSnapshot {
    pub fn pending(task: &ScheduledTask) -> Self {
        let waited = Utc::now() - task.submitted_at;
        Self {
            execution_id: task.execution_id.clone(),
            status: ExecutionStatus::Pending,
            current_step: 0,
            total_steps: task.task.steps.len(),
            current_url: None,
            error: None,
            elapsed_ms: waited.num_milliseconds().max(0) as u64,
            worker_id: None,
            user_id: task.user_id.clone(),
        }
    }
}
