//! Step plan primitives shared by the planner, the scheduler and the wire protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type StepId = u32;

pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Closed set of browser actions a remote agent understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    #[serde(alias = "open_url")]
    Navigate,
    Input,
    Click,
    Wait,
    Scroll,
    Extract,
    Submit,
    Screenshot,
    Close,
}

impl StepAction {
    pub const ALL: [StepAction; 9] = [
        StepAction::Navigate,
        StepAction::Input,
        StepAction::Click,
        StepAction::Wait,
        StepAction::Scroll,
        StepAction::Extract,
        StepAction::Submit,
        StepAction::Screenshot,
        StepAction::Close,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepAction::Navigate => "navigate",
            StepAction::Input => "input",
            StepAction::Click => "click",
            StepAction::Wait => "wait",
            StepAction::Scroll => "scroll",
            StepAction::Extract => "extract",
            StepAction::Submit => "submit",
            StepAction::Screenshot => "screenshot",
            StepAction::Close => "close",
        }
    }

    /// Actions that usually load a new document and need a settle pause before the next command.
    pub fn is_page_transition(self) -> bool {
        matches!(self, StepAction::Navigate | StepAction::Click)
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

fn default_required() -> bool {
    true
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_id: StepId,
    pub action: StepAction,
    /// Primary locator (CSS selector, XPath) or URL for navigation.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    /// Seconds, only meaningful for `wait`.
    #[serde(default)]
    pub wait_time: Option<u32>,
    #[serde(default)]
    pub fallback_target: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub description: String,
}

impl Step {
    pub fn new(step_id: StepId, action: StepAction) -> Self {
        Self {
            step_id,
            action,
            target: None,
            value: None,
            wait_time: None,
            fallback_target: None,
            required: true,
            retry_count: DEFAULT_RETRY_COUNT,
            description: String::new(),
        }
    }

    pub fn navigate(step_id: StepId, url: impl Into<String>) -> Self {
        Self::new(step_id, StepAction::Navigate).with_target(url)
    }

    pub fn click(step_id: StepId, target: impl Into<String>) -> Self {
        Self::new(step_id, StepAction::Click).with_target(target)
    }

    pub fn input(step_id: StepId, target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(step_id, StepAction::Input)
            .with_target(target)
            .with_value(value)
    }

    pub fn wait(step_id: StepId, seconds: u32) -> Self {
        let mut step = Self::new(step_id, StepAction::Wait);
        step.wait_time = Some(seconds);
        step
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback_target = Some(fallback.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Retry budget, never below a single attempt.
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: StepId,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(step_id: StepId, message: impl Into<String>) -> Self {
        Self {
            step_id,
            success: true,
            message: Some(message.into()),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failure(step_id: StepId, error: impl Into<String>) -> Self {
        Self {
            step_id,
            success: false,
            message: None,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults_apply_when_fields_are_missing() {
        let step: Step =
            serde_json::from_str(r##"{"stepId": 2, "action": "click", "target": "#go"}"##)
                .unwrap();
        assert_eq!(step.step_id, 2);
        assert_eq!(step.action, StepAction::Click);
        assert!(step.required);
        assert_eq!(step.retry_count, DEFAULT_RETRY_COUNT);
        assert!(step.fallback_target.is_none());
    }

    #[test]
    fn legacy_open_url_maps_to_navigate() {
        let step: Step = serde_json::from_str(
            r#"{"stepId": 1, "action": "open_url", "target": "https://example.com"}"#,
        )
        .unwrap();
        assert_eq!(step.action, StepAction::Navigate);
        assert!(step.action.is_page_transition());
    }

    #[test]
    fn camel_case_fields_round_out_the_step() {
        let step: Step = serde_json::from_str(
            r##"{"stepId": 4, "action": "wait", "waitTime": 2, "fallbackTarget": "#alt", "retryCount": 0}"##,
        )
        .unwrap();
        assert_eq!(step.wait_time, Some(2));
        assert_eq!(step.fallback_target.as_deref(), Some("#alt"));
        assert_eq!(step.attempts(), 1);
    }

    #[test]
    fn only_navigate_and_click_are_page_transitions() {
        let transitions: Vec<_> = StepAction::ALL
            .into_iter()
            .filter(|action| action.is_page_transition())
            .collect();
        assert_eq!(transitions, vec![StepAction::Navigate, StepAction::Click]);
    }
}
