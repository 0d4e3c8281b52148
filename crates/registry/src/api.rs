use std::collections::HashSet;

use chrono::{DateTime, Utc};
use taskpilot_core_types::{UserId, WorkerId};

use crate::model::{SessionStatus, WorkerSession};

/// Identity and liveness bookkeeping for connected agents.
///
/// Busy tracking is owned by the scheduler; callers pass the worker ids they consider
/// occupied to [`WorkerRegistry::available_session`].
pub trait WorkerRegistry: Send + Sync {
    fn register(&self, session: WorkerSession) -> Option<WorkerSession>;
    fn unregister(&self, worker: &WorkerId) -> Option<WorkerSession>;
    fn available_session(&self, user: &UserId, busy: &HashSet<WorkerId>) -> Option<WorkerSession>;
    fn session(&self, worker: &WorkerId) -> Option<WorkerSession>;
    fn update_heartbeat(&self, worker: &WorkerId, at: DateTime<Utc>) -> bool;
    fn update_page_info(&self, worker: &WorkerId, url: Option<String>, title: Option<String>)
        -> bool;
    fn touch(&self, worker: &WorkerId) -> bool;
    fn set_status(&self, worker: &WorkerId, status: SessionStatus) -> bool;
    fn sessions(&self) -> Vec<WorkerSession>;
}
