use serde::{Deserialize, Serialize};

use crate::step::Step;
use crate::TaskId;

/// Ordered step plan plus the natural-language description it was derived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: Option<TaskId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<Step>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn value(self) -> u32 {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Normal => 5,
            TaskPriority::High => 10,
            TaskPriority::Urgent => 20,
        }
    }
}

impl From<TaskPriority> for u32 {
    fn from(priority: TaskPriority) -> Self {
        priority.value()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_map_to_numeric_weights() {
        assert_eq!(u32::from(TaskPriority::Low), 1);
        assert_eq!(u32::from(TaskPriority::Normal), 5);
        assert_eq!(TaskPriority::High.value(), 10);
        assert_eq!(TaskPriority::Urgent.value(), 20);
    }

    #[test]
    fn task_definition_parses_step_envelope() {
        let task: TaskDefinition = serde_json::from_str(
            r##"{"name": "search", "steps": [{"stepId": 1, "action": "navigate", "target": "https://example.com"}]}"##,
        )
        .unwrap();
        assert_eq!(task.steps.len(), 1);
        assert!(task.id.is_none());
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }
}
