use taskpilot_core_types::{PilotError, WorkerId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("worker session {0} not found")]
    NotFound(WorkerId),
    #[error("worker session {0} already registered")]
    AlreadyRegistered(WorkerId),
}

impl RegistryError {
    pub fn into_pilot_error(self) -> PilotError {
        PilotError::new(self.to_string())
    }
}
