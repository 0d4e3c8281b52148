use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;

use taskpilot_core_types::{
    ExecutionId, ExecutionStatus, Step, StepResult, TaskDefinition, TaskId, UserId, WorkerId,
};
use taskpilot_state_center::ExecutionSummary;

use crate::correlator::StepCorrelator;
use crate::model::{ExecutionSnapshot, ScheduledTask};

#[derive(Debug)]
struct ExecutionState {
    steps: Vec<Step>,
    cursor: usize,
    results: Vec<StepResult>,
    status: ExecutionStatus,
    error: Option<String>,
    current_url: Option<String>,
    replans: u32,
}

/// Mutable state of one running execution, shared between the driver and inbound handlers.
#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: ExecutionId,
    worker_id: WorkerId,
    user_id: UserId,
    task_id: Option<TaskId>,
    task_name: String,
    description: String,
    state: RwLock<ExecutionState>,
    cancelled: AtomicBool,
    correlator: StepCorrelator,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl ExecutionContext {
    pub fn new(
        execution_id: ExecutionId,
        worker_id: WorkerId,
        user_id: UserId,
        task: TaskDefinition,
    ) -> Self {
        Self {
            execution_id,
            worker_id,
            user_id,
            task_id: task.id,
            task_name: task.name,
            description: task.description,
            state: RwLock::new(ExecutionState {
                steps: task.steps,
                cursor: 0,
                results: Vec::new(),
                status: ExecutionStatus::Running,
                error: None,
                current_url: None,
                replans: 0,
            }),
            cancelled: AtomicBool::new(false),
            correlator: StepCorrelator::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Builds the context for a task that was just bound to `worker`.
    pub fn from_assigned(task: ScheduledTask, worker: WorkerId) -> Arc<Self> {
        Arc::new(Self::new(task.execution_id, worker, task.user_id, task.task))
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn correlator(&self) -> &StepCorrelator {
        &self.correlator
    }

    /// Text handed to the re-planner as the original request.
    pub fn original_description(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.task_name
        } else {
            &self.description
        }
    }

    /// Index and a copy of the step the cursor points at.
    pub fn current_step(&self) -> Option<(usize, Step)> {
        let state = self.state.read();
        state
            .steps
            .get(state.cursor)
            .cloned()
            .map(|step| (state.cursor, step))
    }

    pub fn cursor(&self) -> usize {
        self.state.read().cursor
    }

    pub fn steps(&self) -> Vec<Step> {
        self.state.read().steps.clone()
    }

    pub fn results(&self) -> Vec<StepResult> {
        self.state.read().results.clone()
    }

    pub fn replans(&self) -> u32 {
        self.state.read().replans
    }

    pub fn current_url(&self) -> Option<String> {
        self.state.read().current_url.clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.state.read().status
    }

    pub fn set_current_url(&self, url: impl Into<String>) {
        self.state.write().current_url = Some(url.into());
    }

    /// Appends a result and advances past the current step.
    pub fn record_result(&self, result: StepResult) {
        let mut state = self.state.write();
        state.results.push(result);
        state.cursor += 1;
    }

    /// Replaces everything from the cursor on with `steps`. The cursor stays put so the
    /// first replacement step runs next.
    pub fn apply_replan(&self, marker: StepResult, steps: Vec<Step>) {
        let mut state = self.state.write();
        let cursor = state.cursor;
        state.steps.truncate(cursor);
        state.steps.extend(steps);
        state.results.push(marker);
        state.replans += 1;
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn finish(&self, status: ExecutionStatus, error: Option<String>) {
        let mut state = self.state.write();
        state.status = status;
        state.error = error;
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        let state = self.state.read();
        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            status: state.status,
            current_step: state.cursor,
            total_steps: state.steps.len(),
            current_url: state.current_url.clone(),
            error: state.error.clone(),
            elapsed_ms: self.elapsed_ms(),
            worker_id: Some(self.worker_id.clone()),
            user_id: self.user_id.clone(),
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        let state = self.state.read();
        ExecutionSummary {
            execution_id: self.execution_id.clone(),
            task_id: self.task_id.clone(),
            task_name: self.task_name.clone(),
            user_id: self.user_id.clone(),
            worker_id: Some(self.worker_id.clone()),
            status: state.status,
            total_steps: state.steps.len(),
            results: state.results.clone(),
            error: state.error.clone(),
            replans: state.replans,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.elapsed_ms(),
        }
    }
}
