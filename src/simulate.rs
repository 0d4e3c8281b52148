//! In-process stand-in for a browser-extension agent.
//!
//! The simulated agent talks to an [`AgentGateway`] exactly like a socket-backed one would:
//! it reads outbound frames from its queue and answers with JSON text frames.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use extensions_bridge::{OutboundFrame, OutboundKind};
use taskpilot_core_types::{StepId, UserId, WorkerId};

use crate::gateway::AgentGateway;

pub struct SimulatedAgent {
    worker: WorkerId,
    user: Option<UserId>,
    failing_steps: HashSet<StepId>,
    latency: Duration,
}

impl SimulatedAgent {
    pub fn new(worker: impl Into<WorkerId>) -> Self {
        Self {
            worker: worker.into(),
            user: None,
            failing_steps: HashSet::new(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_user(mut self, user: impl Into<UserId>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Every command for this step id is answered with "element not found".
    pub fn failing_step(mut self, step: StepId) -> Self {
        self.failing_steps.insert(step);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Connects, registers and answers commands until the gateway closes the connection.
    ///
    /// The handle resolves to the number of commands answered.
    pub fn spawn(self, gateway: Arc<AgentGateway>) -> JoinHandle<usize> {
        let mut outbound = gateway.connect(self.worker.clone());
        let register = json!({
            "type": "REGISTER",
            "data": {
                "userId": self.user.as_ref().map(|user| user.0.clone()),
                "fingerprint": "simulated",
            },
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        self.send(&gateway, register);

        tokio::spawn(async move {
            let mut answered = 0;
            while let Some(frame) = outbound.recv().await {
                match frame.kind {
                    OutboundKind::ExecuteCommand => {
                        if !self.latency.is_zero() {
                            tokio::time::sleep(self.latency).await;
                        }
                        self.answer(&gateway, &frame);
                        answered += 1;
                    }
                    kind => debug!(worker = %self.worker, ?kind, "simulated agent received frame"),
                }
            }
            answered
        })
    }

    fn answer(&self, gateway: &AgentGateway, frame: &OutboundFrame) {
        let action = frame.data.get("action").and_then(Value::as_str).unwrap_or("");
        let target = frame.data.get("target").and_then(Value::as_str);
        let step = frame
            .step_id
            .as_deref()
            .and_then(|id| id.parse::<StepId>().ok());

        let failing = step.is_some_and(|step| self.failing_steps.contains(&step));
        let data = if failing {
            json!({ "success": false, "error": "element not found" })
        } else {
            if action == "navigate" {
                if let Some(url) = target {
                    self.send(
                        gateway,
                        json!({ "type": "PAGE_INFO", "data": { "url": url, "title": url } }),
                    );
                }
            }
            json!({ "success": true, "message": format!("{action} done") })
        };

        self.send(
            gateway,
            json!({
                "type": "ACTION_RESULT",
                "taskId": frame.task_id,
                "stepId": frame.step_id,
                "data": data,
                "timestamp": chrono::Utc::now().timestamp_millis(),
            }),
        );
    }

    fn send(&self, gateway: &AgentGateway, frame: Value) {
        if let Err(err) = gateway.handle_text(&self.worker, &frame.to_string()) {
            warn!(worker = %self.worker, %err, "simulated agent frame rejected");
        }
    }
}
