use serde::Deserialize;
use serde_json::Value;

use taskpilot_core_types::{Step, StepAction, StepId, StepResult};

use crate::errors::PlannerError;

const PLAN_INSTRUCTIONS: &str = r##"You design browser automation flows. Convert the user's request into an ordered list of steps.

Available actions:
- navigate: open a page, target is the full URL
- click: click an element, target is a CSS selector or XPath
- input: type text, target is the field selector, value is the text
- wait: pause, waitTime is the number of seconds
- scroll: scroll the page, target is the direction (down/up)
- extract: read data, target is the element selector
- submit: submit a form, target is the submit control selector
- screenshot: capture the page
- close: close the tab

Rules:
1. Output strict JSON containing a "steps" array.
2. Every step has stepId, action and target (except wait/screenshot/close).
3. Give every step a short human-readable description.
4. Add wait steps after actions that load dynamic content.
5. When information is missing, assume the most likely flow.

Example:
{
  "steps": [
    {"stepId": 1, "action": "navigate", "target": "https://www.example.com", "description": "open the site"},
    {"stepId": 2, "action": "wait", "waitTime": 2, "description": "let the page load"},
    {"stepId": 3, "action": "input", "target": "#username", "value": "test_user", "description": "fill the user name"},
    {"stepId": 4, "action": "click", "target": "#login-button", "description": "press login"}
  ]
}"##;

pub fn build_plan_prompt(request: &str) -> String {
    format!(
        "{PLAN_INSTRUCTIONS}\n\nUser request: \"{}\"\n\nIf the request involves logging in, use common user name and password field selectors. \
         For searches, target the usual search box and search button.\n\nReturn JSON only, with no explanation.",
        request.trim()
    )
}

pub fn build_replan_prompt(
    original_description: &str,
    completed: &[StepResult],
    failing: &StepResult,
    current_url: Option<&str>,
) -> String {
    let completed_lines = if completed.is_empty() {
        "(none)".to_string()
    } else {
        completed
            .iter()
            .map(|result| {
                format!(
                    "step {}: {}",
                    result.step_id,
                    result.message.as_deref().unwrap_or("done")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let start = failing.step_id;
    format!(
        "You repair interrupted browser automation flows. Re-plan the remaining steps from the current state.\n\n\
         Original task: {original_description}\n\n\
         Completed steps:\n{completed_lines}\n\n\
         Failed step: step {start}\n\
         Failure reason: {reason}\n\n\
         Current page URL: {url}\n\n\
         Consider whether the page structure changed, whether some steps should be skipped, and whether a \
         different locator strategy is needed.\n\n\
         Output only the remaining steps as JSON, numbered starting at {start}. Prefer robust selectors that \
         combine several attributes and add wait steps before critical actions.\n\n\
         Format:\n{{\"steps\": [{{\"stepId\": {start}, \"action\": \"wait\", \"waitTime\": 2, \"description\": \"let the page settle\"}}]}}",
        reason = failing.error.as_deref().unwrap_or("unknown"),
        url = current_url.unwrap_or("unknown"),
    )
}

/// Pulls the JSON body out of a model reply that may wrap it in markdown fences.
pub fn extract_json(reply: &str) -> &str {
    for fence in ["```json", "```"] {
        if let Some(start) = reply.find(fence) {
            let body_start = start + fence.len();
            if let Some(end) = reply.rfind("```") {
                if end > body_start {
                    return reply[body_start..end].trim();
                }
            }
            return reply[body_start..].trim();
        }
    }
    reply.trim()
}

#[derive(Deserialize)]
struct StepEnvelope {
    steps: Vec<Value>,
}

/// Parses `{"steps": [...]}` or a bare array. Entries that fail to parse are skipped.
pub fn parse_steps(json: &str) -> Result<Vec<Step>, PlannerError> {
    let raw: Vec<Value> = match serde_json::from_str::<StepEnvelope>(json) {
        Ok(envelope) => envelope.steps,
        Err(_) => serde_json::from_str::<Vec<Value>>(json)
            .map_err(|err| PlannerError::invalid(format!("no step list in reply: {err}")))?,
    };

    let total = raw.len();
    let steps: Vec<Step> = raw
        .into_iter()
        .filter_map(|value| serde_json::from_value::<Step>(value).ok())
        .collect();
    if steps.is_empty() {
        return Err(PlannerError::invalid(format!(
            "none of {total} entries is a valid step"
        )));
    }
    if steps.len() < total {
        tracing::debug!(kept = steps.len(), total, "dropped unparsable plan entries");
    }
    Ok(steps)
}

/// Renumbers steps sequentially starting at `start`.
pub fn renumber(steps: Vec<Step>, start: StepId) -> Vec<Step> {
    steps
        .into_iter()
        .enumerate()
        .map(|(offset, mut step)| {
            step.step_id = start.saturating_add(offset as StepId);
            step
        })
        .collect()
}

/// Drops steps whose action needs a target but has none.
pub fn sanitize(steps: Vec<Step>) -> Vec<Step> {
    steps
        .into_iter()
        .filter(|step| {
            let needs_target = matches!(
                step.action,
                StepAction::Navigate | StepAction::Click | StepAction::Input
            );
            !needs_target || step.target.as_deref().is_some_and(|t| !t.trim().is_empty())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fences() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("here:\n```\n[1]\n```\nthanks"), "[1]");
        assert_eq!(extract_json("  {\"steps\":[]}  "), "{\"steps\":[]}");
    }

    #[test]
    fn parse_steps_accepts_envelope_or_array() {
        let envelope = r#"{"steps":[{"stepId":1,"action":"navigate","target":"https://a.test"}]}"#;
        let array = r##"[{"stepId":1,"action":"click","target":"#go"},{"bogus":true}]"##;
        assert_eq!(parse_steps(envelope).unwrap().len(), 1);
        assert_eq!(parse_steps(array).unwrap()[0].action, StepAction::Click);
        assert!(parse_steps(r#"{"steps":[]}"#).is_err());
        assert!(parse_steps("not json").is_err());
    }

    #[test]
    fn renumber_continues_from_start() {
        let steps = vec![Step::wait(9, 1), Step::click(1, "#x")];
        let ids: Vec<_> = renumber(steps, 3).iter().map(|s| s.step_id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn renumber_saturates_near_the_id_ceiling() {
        let steps = vec![Step::wait(1, 1), Step::wait(2, 1), Step::wait(3, 1)];
        let ids: Vec<_> = renumber(steps, StepId::MAX - 1)
            .iter()
            .map(|s| s.step_id)
            .collect();
        assert_eq!(ids, vec![StepId::MAX - 1, StepId::MAX, StepId::MAX]);
    }

    #[test]
    fn sanitize_drops_targetless_clicks() {
        let steps = vec![Step::new(1, StepAction::Click), Step::wait(2, 1)];
        assert_eq!(sanitize(steps).len(), 1);
    }

    #[test]
    fn replan_prompt_mentions_failure_and_numbering() {
        let prompt = build_replan_prompt(
            "search rust",
            &[StepResult::success(1, "opened")],
            &StepResult::failure(2, "page structure changed"),
            Some("https://a.test"),
        );
        assert!(prompt.contains("step 1: opened"));
        assert!(prompt.contains("page structure changed"));
        assert!(prompt.contains("numbered starting at 2"));
    }
}
