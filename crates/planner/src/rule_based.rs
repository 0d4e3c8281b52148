use once_cell::sync::Lazy;
use regex::Regex;

use taskpilot_core_types::{Step, StepAction, StepId};

use crate::PlannerConfig;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("url pattern"));
static INPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:search|type|enter)\s+(?:for\s+)?["'“]([^"'”]+)["'”]"#)
        .expect("input pattern")
});
static CLICK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:click|press|tap)\s+(?:on\s+)?(?:the\s+)?["'“]([^"'”]+)["'”]"#)
        .expect("click pattern")
});
static WAIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwait\s+(?:for\s+)?(\d+)\s*(?:s|sec|secs|seconds?)\b").expect("wait pattern")
});
static SCREENSHOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bscreenshot\b").expect("screenshot pattern"));
static SCROLL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bscroll\s+(up|down)\b").expect("scroll pattern"));

const SEARCH_FIELD: &str = "input[type=text],#kw,#search,input[name=q]";
const SEARCH_BUTTON: &str = "#su,.search-btn,button[type=submit]";
const LOGIN_BUTTON: &str = "#login,.login-btn";

/// Keyword planner used when no text-generation backend is available or its reply is unusable.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedPlanner {
    config: PlannerConfig,
}

impl RuleBasedPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Produces at least one step; requests with nothing recognisable become a single wait.
    pub fn draft(&self, text: &str) -> Vec<Step> {
        let lower = text.to_ascii_lowercase();
        let mut found: Vec<(usize, Step)> = Vec::new();

        for url in URL_RE.find_iter(text) {
            let target = url.as_str().trim_end_matches(&['.', ',', ')'][..]);
            found.push((
                url.start(),
                Step::navigate(0, target).with_description(format!("open {target}")),
            ));
        }
        if found.is_empty() {
            for (site, url) in [("baidu", "https://www.baidu.com"), ("google", "https://www.google.com")] {
                if let Some(pos) = lower.find(site) {
                    found.push((pos, Step::navigate(0, url).with_description(format!("open {site}"))));
                    break;
                }
            }
        }

        let mut typed = false;
        for caps in INPUT_RE.captures_iter(text) {
            if let (Some(whole), Some(value)) = (caps.get(0), caps.get(1)) {
                typed = true;
                found.push((
                    whole.start(),
                    Step::input(0, SEARCH_FIELD, value.as_str())
                        .with_description(format!("type \"{}\"", value.as_str())),
                ));
            }
        }

        let mut clicked = false;
        for caps in CLICK_RE.captures_iter(text) {
            if let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) {
                clicked = true;
                found.push((
                    whole.start(),
                    Step::click(0, format!("text={}", label.as_str()))
                        .with_description(format!("click \"{}\"", label.as_str())),
                ));
            }
        }
        if !clicked {
            if let Some(pos) = lower.find("login").or_else(|| lower.find("log in")) {
                found.push((pos, Step::click(0, LOGIN_BUTTON).with_description("press login")));
            } else if typed || lower.contains("search") {
                // after the typed query, when there is one
                let pos = if typed {
                    text.len()
                } else {
                    lower.find("search").unwrap_or(text.len())
                };
                found.push((pos, Step::click(0, SEARCH_BUTTON).with_description("run the search")));
            }
        }

        for caps in SCROLL_RE.captures_iter(text) {
            if let (Some(whole), Some(direction)) = (caps.get(0), caps.get(1)) {
                found.push((
                    whole.start(),
                    Step::new(0, StepAction::Scroll)
                        .with_target(direction.as_str().to_lowercase())
                        .with_description(format!("scroll {}", direction.as_str())),
                ));
            }
        }

        for caps in WAIT_RE.captures_iter(text) {
            if let (Some(whole), Some(seconds)) = (caps.get(0), caps.get(1)) {
                let seconds = seconds.as_str().parse().unwrap_or(1);
                found.push((
                    whole.start(),
                    Step::wait(0, seconds).with_description(format!("wait {seconds}s")),
                ));
            }
        }

        if let Some(hit) = SCREENSHOT_RE.find(text) {
            found.push((
                hit.start(),
                Step::new(0, StepAction::Screenshot).with_description("capture the page"),
            ));
        }

        if found.is_empty() {
            return vec![Step::wait(1, 1).with_description("no actionable instruction recognised")];
        }

        found.sort_by_key(|(pos, _)| *pos);
        found
            .into_iter()
            .take(self.config.max_steps.max(1))
            .enumerate()
            .map(|(index, (_, mut step))| {
                step.step_id = index as StepId + 1;
                step
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_text_becomes_a_wait() {
        let steps = RuleBasedPlanner::default().draft("think about automation safety");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, StepAction::Wait);
    }

    #[test]
    fn trailing_punctuation_is_trimmed_from_urls() {
        let steps = RuleBasedPlanner::default().draft("Open https://example.com/docs.");
        assert_eq!(steps[0].target.as_deref(), Some("https://example.com/docs"));
    }

    #[test]
    fn max_steps_truncates() {
        let planner = RuleBasedPlanner::new(PlannerConfig { max_steps: 2 });
        let steps = planner.draft("open https://a.test, wait 2 seconds, take a screenshot");
        assert_eq!(steps.len(), 2);
    }
}
