//! Natural-language → step-plan generation and mid-execution re-planning.

pub mod errors;
pub mod prompt;
mod rule_based;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use taskpilot_core_types::{Step, StepResult, TaskDefinition};

pub use errors::PlannerError;
pub use prompt::{extract_json, parse_steps, renumber};
pub use rule_based::RuleBasedPlanner;

/// Planner configuration controlling heuristic behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum number of steps the rule-based planner may emit.
    pub max_steps: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_steps: 12 }
    }
}

/// Abstraction over text-generation backends so multiple vendors can plug in.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PlannerError>;
}

#[async_trait]
impl<T> TextGenerator for Arc<T>
where
    T: TextGenerator + ?Sized,
{
    async fn generate(&self, prompt: &str) -> Result<String, PlannerError> {
        (**self).generate(prompt).await
    }
}

/// Everything a re-planner needs to know about an interrupted execution.
#[derive(Debug, Clone)]
pub struct ReplanRequest {
    pub original_description: String,
    pub completed: Vec<StepResult>,
    pub failing: StepResult,
    pub current_url: Option<String>,
}

/// Produces replacement steps for the unexecuted remainder of a plan.
///
/// Returned steps are numbered from the failing step's id. An empty list means no re-plan.
#[async_trait]
pub trait Replanner: Send + Sync {
    async fn replan(&self, request: &ReplanRequest) -> Vec<Step>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Model,
    RuleBased,
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub task: TaskDefinition,
    pub source: PlanSource,
    /// Bullet-style notes on how the plan was produced.
    pub explanations: Vec<String>,
}

/// Planner backed by a text generator, falling back to keyword rules.
pub struct LlmPlanner {
    generator: Option<Arc<dyn TextGenerator>>,
    fallback: RuleBasedPlanner,
}

impl LlmPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>, config: PlannerConfig) -> Self {
        Self {
            generator: Some(generator),
            fallback: RuleBasedPlanner::new(config),
        }
    }

    /// Planner without a model backend; plans come from rules and re-plans are always empty.
    pub fn rules_only(config: PlannerConfig) -> Self {
        Self {
            generator: None,
            fallback: RuleBasedPlanner::new(config),
        }
    }

    pub async fn generate_plan(&self, text: &str) -> PlanOutcome {
        let name = task_name(text);
        let mut explanations = Vec::new();

        if let Some(generator) = &self.generator {
            match self.plan_with_model(generator.as_ref(), text).await {
                Ok(steps) => {
                    info!(steps = steps.len(), "model plan accepted");
                    return PlanOutcome {
                        task: TaskDefinition::new(name, steps).with_description(text.trim()),
                        source: PlanSource::Model,
                        explanations: vec!["plan generated by model".to_string()],
                    };
                }
                Err(err) => {
                    warn!(%err, "model plan rejected, using rule-based planner");
                    explanations.push(format!("model plan unavailable: {err}"));
                }
            }
        }

        let steps = self.fallback.draft(text);
        explanations.push(format!("rule-based plan with {} steps", steps.len()));
        PlanOutcome {
            task: TaskDefinition::new(name, steps).with_description(text.trim()),
            source: PlanSource::RuleBased,
            explanations,
        }
    }

    async fn plan_with_model(
        &self,
        generator: &dyn TextGenerator,
        text: &str,
    ) -> Result<Vec<Step>, PlannerError> {
        let reply = generator.generate(&prompt::build_plan_prompt(text)).await?;
        let steps = prompt::sanitize(parse_steps(extract_json(&reply))?);
        if steps.is_empty() {
            return Err(PlannerError::invalid("plan has no executable steps"));
        }
        Ok(renumber(steps, 1))
    }
}

#[async_trait]
impl Replanner for LlmPlanner {
    async fn replan(&self, request: &ReplanRequest) -> Vec<Step> {
        let Some(generator) = &self.generator else {
            return Vec::new();
        };
        let prompt = prompt::build_replan_prompt(
            &request.original_description,
            &request.completed,
            &request.failing,
            request.current_url.as_deref(),
        );
        let reply = match generator.generate(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%err, "re-plan generation failed");
                return Vec::new();
            }
        };
        match parse_steps(extract_json(&reply)) {
            Ok(steps) => {
                let steps = renumber(prompt::sanitize(steps), request.failing.step_id);
                info!(steps = steps.len(), from = request.failing.step_id, "re-plan produced");
                steps
            }
            Err(err) => {
                warn!(%err, "re-plan reply unusable");
                Vec::new()
            }
        }
    }
}

/// Deterministic generator that replays queued replies; used for tests and offline runs.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, PlannerError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .push_back(Err(PlannerError::generation(message)));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, PlannerError> {
        self.prompts.lock().push(prompt.to_string());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(PlannerError::generation("no scripted reply left")))
    }
}

fn task_name(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "Browser task".to_string()
    } else if trimmed.chars().count() <= 72 {
        trimmed.to_string()
    } else {
        format!("{}…", trimmed.chars().take(69).collect::<String>())
    }
}
