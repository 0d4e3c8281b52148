use thiserror::Error;

/// Errors emitted by the planner crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// The text-generation backend failed or is unavailable.
    #[error("text generation failed: {0}")]
    Generation(String),

    /// The generated text did not contain a usable step list.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

impl PlannerError {
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPlan(message.into())
    }
}
