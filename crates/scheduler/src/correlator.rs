use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use taskpilot_core_types::StepId;

/// Reply reported by the agent for one dispatched command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepReply {
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
    pub data: Value,
}

impl StepReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Per-execution table of one-shot reply slots keyed by step id.
///
/// A slot is resolved at most once; replies without a waiting slot are dropped.
#[derive(Debug, Default)]
pub struct StepCorrelator {
    slots: DashMap<StepId, oneshot::Sender<StepReply>>,
}

impl StepCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a slot for `step`, replacing any slot left over from a previous attempt.
    pub fn register(&self, step: StepId) -> oneshot::Receiver<StepReply> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(step, tx);
        rx
    }

    pub fn resolve(&self, step: StepId, reply: StepReply) -> bool {
        match self.slots.remove(&step) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => {
                debug!(step, "discarding reply without a waiting slot");
                false
            }
        }
    }

    pub fn cancel(&self, step: StepId) -> bool {
        self.slots.remove(&step).is_some()
    }

    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}
