use thiserror::Error;

use taskpilot_core_types::{ExecutionId, PilotError, TaskId, UserId};
use taskpilot_state_center::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("execution {0} is not pending")]
    NotPending(ExecutionId),
    #[error("no idle worker for user {0}")]
    NoIdleWorker(UserId),
    #[error("execution pool exhausted")]
    PoolExhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SchedulerError> for PilotError {
    fn from(value: SchedulerError) -> Self {
        PilotError::new(value.to_string())
    }
}
