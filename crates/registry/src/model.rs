use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskpilot_core_types::{UserId, WorkerId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Busy,
    Disconnected,
}

/// A connected browser-extension agent, addressable by its connection id while the
/// connection stays open.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerSession {
    pub worker_id: WorkerId,
    pub user_id: UserId,
    pub fingerprint: Option<String>,
    pub current_url: Option<String>,
    pub current_title: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
}

impl WorkerSession {
    pub fn new(worker_id: WorkerId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            worker_id,
            user_id,
            fingerprint: None,
            current_url: None,
            current_title: None,
            connected_at: now,
            last_heartbeat: now,
            last_activity: now,
            status: SessionStatus::Active,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}
