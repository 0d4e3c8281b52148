//! JSON text frames exchanged with browser-extension agents.
//!
//! Every frame is an envelope `{type, taskId?, stepId?, data, timestamp}`. The `taskId`
//! field carries the execution id; agents are expected to echo `taskId`/`stepId` from an
//! `EXECUTE_COMMAND` on every reply, either on the envelope or inside `data`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use taskpilot_core_types::{ExecutionId, Step, StepAction, StepId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownKind(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundKind {
    Register,
    PageInfo,
    ElementFound,
    ActionResult,
    Error,
    Heartbeat,
}

impl InboundKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "REGISTER" => Some(Self::Register),
            "PAGE_INFO" => Some(Self::PageInfo),
            "ELEMENT_FOUND" => Some(Self::ElementFound),
            "ACTION_RESULT" => Some(Self::ActionResult),
            "ERROR" => Some(Self::Error),
            "HEARTBEAT" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundKind {
    Connected,
    Registered,
    ExecuteCommand,
    HeartbeatAck,
    Error,
}

/// Raw inbound envelope before it is interpreted.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub task_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_from_value))
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

impl Envelope {
    fn str_field(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn bool_field(&self, key: &str) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Correlation pair from the envelope, falling back to the payload.
    pub fn correlation(&self) -> Option<Correlation> {
        let execution = self
            .task_id
            .clone()
            .or_else(|| self.data.get("taskId").and_then(id_from_value))?;
        let step = self
            .step_id
            .clone()
            .or_else(|| self.data.get("stepId").and_then(id_from_value))?;
        let step_id = step.parse::<StepId>().ok()?;
        Some(Correlation {
            execution_id: ExecutionId(execution),
            step_id,
        })
    }
}

/// The (execution id, step id) pair that ties a reply to the command that caused it.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Correlation {
    pub execution_id: ExecutionId,
    pub step_id: StepId,
}

/// Interpreted inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    Register {
        user_id: Option<String>,
        fingerprint: Option<String>,
    },
    PageInfo {
        url: Option<String>,
        title: Option<String>,
    },
    ElementFound {
        correlation: Option<Correlation>,
        found: bool,
        data: Value,
    },
    ActionResult {
        correlation: Option<Correlation>,
        success: bool,
        message: Option<String>,
        error: Option<String>,
        data: Value,
    },
    Error {
        correlation: Option<Correlation>,
        error: String,
        data: Value,
    },
    Heartbeat,
}

impl InboundEvent {
    pub fn kind(&self) -> InboundKind {
        match self {
            InboundEvent::Register { .. } => InboundKind::Register,
            InboundEvent::PageInfo { .. } => InboundKind::PageInfo,
            InboundEvent::ElementFound { .. } => InboundKind::ElementFound,
            InboundEvent::ActionResult { .. } => InboundKind::ActionResult,
            InboundEvent::Error { .. } => InboundKind::Error,
            InboundEvent::Heartbeat => InboundKind::Heartbeat,
        }
    }
}

pub fn parse_inbound(text: &str, max_bytes: usize) -> Result<InboundEvent, ProtocolError> {
    if text.len() > max_bytes {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            limit: max_bytes,
        });
    }
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    let kind = InboundKind::from_wire(&envelope.kind)
        .ok_or_else(|| ProtocolError::UnknownKind(envelope.kind.clone()))?;

    let event = match kind {
        InboundKind::Register => InboundEvent::Register {
            user_id: envelope.str_field("userId").filter(|id| !id.is_empty()),
            fingerprint: envelope.str_field("fingerprint"),
        },
        InboundKind::PageInfo => InboundEvent::PageInfo {
            url: envelope.str_field("url"),
            title: envelope.str_field("title"),
        },
        InboundKind::ElementFound => InboundEvent::ElementFound {
            correlation: envelope.correlation(),
            found: envelope.bool_field("found"),
            data: envelope.data.clone(),
        },
        InboundKind::ActionResult => InboundEvent::ActionResult {
            correlation: envelope.correlation(),
            success: envelope.bool_field("success"),
            message: envelope.str_field("message"),
            error: envelope.str_field("error"),
            data: envelope.data.clone(),
        },
        InboundKind::Error => InboundEvent::Error {
            correlation: envelope.correlation(),
            error: envelope
                .str_field("error")
                .or_else(|| envelope.str_field("message"))
                .unwrap_or_else(|| "agent reported an error".to_string()),
            data: envelope.data.clone(),
        },
        InboundKind::Heartbeat => InboundEvent::Heartbeat,
    };
    Ok(event)
}

/// One browser action addressed to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub execution_id: ExecutionId,
    pub step_id: StepId,
    pub action: StepAction,
    pub target: Option<String>,
    pub value: Option<String>,
    pub wait_time: Option<u32>,
    pub timeout_ms: u64,
}

impl Command {
    pub fn for_step(execution_id: ExecutionId, step: &Step, timeout_ms: u64) -> Self {
        Self {
            execution_id,
            step_id: step.step_id,
            action: step.action,
            target: step.target.clone(),
            value: step.value.clone(),
            wait_time: step.wait_time,
            timeout_ms,
        }
    }

    pub fn correlation(&self) -> Correlation {
        Correlation {
            execution_id: self.execution_id.clone(),
            step_id: self.step_id,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub data: Value,
    pub timestamp: i64,
}

impl OutboundFrame {
    fn new(kind: OutboundKind, data: Value) -> Self {
        Self {
            kind,
            task_id: None,
            step_id: None,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn connected(session_id: &str) -> Self {
        Self::new(OutboundKind::Connected, json!({ "sessionId": session_id }))
    }

    pub fn registered(status: &str) -> Self {
        Self::new(OutboundKind::Registered, json!({ "status": status }))
    }

    pub fn heartbeat_ack() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self::new(OutboundKind::HeartbeatAck, json!({ "timestamp": now }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(OutboundKind::Error, json!({ "message": message.into() }))
    }

    pub fn execute_command(command: &Command) -> Self {
        let mut frame = Self::new(
            OutboundKind::ExecuteCommand,
            json!({
                "action": command.action,
                "target": command.target,
                "value": command.value,
                "waitTime": command.wait_time,
                "timeout": command.timeout_ms,
            }),
        );
        frame.task_id = Some(command.execution_id.to_string());
        frame.step_id = Some(command.step_id.to_string());
        frame
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|err| ProtocolError::Encode(err.to_string()))
    }
}
