//! Historical failure → solution associations consulted before a step is given up on.

pub mod config;
pub mod page;

use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use taskpilot_core_types::{Step, StepAction};

pub use config::KnowledgeConfig;
pub use page::PageType;

/// A corrective action for a failed step.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    AlternateLocator { selector: String },
    InsertWait { seconds: u32 },
}

/// What went wrong, as seen by the recovery path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Coarse failure class such as `locate`, `timeout` or `semantic`.
    pub kind: String,
    pub message: String,
}

impl FailureReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn find_solution(
        &self,
        failure: &FailureReport,
        step: &Step,
        current_url: Option<&str>,
    ) -> Option<Suggestion>;

    /// Reinforces a suggestion that fixed the step.
    async fn record_outcome(
        &self,
        failure: &FailureReport,
        step: &Step,
        applied: &Suggestion,
        current_url: Option<&str>,
    );
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExceptionCase {
    pub id: String,
    pub error_kind: String,
    pub error_message: String,
    pub page_url: Option<String>,
    pub action: StepAction,
    pub target: Option<String>,
    pub solution: Suggestion,
    pub success_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementPattern {
    pub page_type: PageType,
    pub action: StepAction,
    pub selector: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    pub usage_count: u64,
    pub success_rate: f64,
    pub last_success_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub exception_cases: u64,
    pub element_patterns: u64,
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub top_solutions: Vec<ExceptionCase>,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedKnowledge {
    cases: Vec<ExceptionCase>,
    patterns: Vec<ElementPattern>,
}

#[derive(Default)]
struct KnowledgeMetrics {
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl KnowledgeMetrics {
    fn record_lookup(&self, hit: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

type CaseKey = (String, StepAction);
type PatternKey = (PageType, StepAction);

pub struct KnowledgeCenter {
    cases: DashMap<CaseKey, Vec<ExceptionCase>>,
    patterns: DashMap<PatternKey, ElementPattern>,
    storage_path: Option<PathBuf>,
    min_success_rate: f64,
    metrics: KnowledgeMetrics,
}

impl Default for KnowledgeCenter {
    fn default() -> Self {
        Self::new(KnowledgeConfig::default().pattern_min_success_rate)
    }
}

impl KnowledgeCenter {
    pub fn new(min_success_rate: f64) -> Self {
        Self {
            cases: DashMap::new(),
            patterns: DashMap::new(),
            storage_path: None,
            min_success_rate,
            metrics: KnowledgeMetrics::default(),
        }
    }

    pub fn from_config(config: &KnowledgeConfig) -> io::Result<Self> {
        match &config.path {
            Some(path) => Self::with_persistence(path.clone(), config.pattern_min_success_rate),
            None => Ok(Self::new(config.pattern_min_success_rate)),
        }
    }

    pub fn with_persistence(path: impl Into<PathBuf>, min_success_rate: f64) -> io::Result<Self> {
        let path = path.into();
        let mut center = Self::new(min_success_rate);
        center.storage_path = Some(path.clone());

        if path.exists() {
            let bytes = fs::read(&path)?;
            if !bytes.is_empty() {
                let stored: PersistedKnowledge = serde_json::from_slice(&bytes)
                    .map_err(|err| io::Error::new(ErrorKind::InvalidData, format!("{err}")))?;
                for case in stored.cases {
                    center
                        .cases
                        .entry((case.error_kind.clone(), case.action))
                        .or_default()
                        .push(case);
                }
                for pattern in stored.patterns {
                    center
                        .patterns
                        .insert((pattern.page_type, pattern.action), pattern);
                }
            }
        }

        Ok(center)
    }

    fn exact_case(&self, kind: &str, action: StepAction) -> Option<ExceptionCase> {
        let mut entry = self.cases.get_mut(&(kind.to_string(), action))?;
        let best = entry
            .value_mut()
            .iter_mut()
            .max_by_key(|case| case.success_count)?;
        best.last_used_at = Some(Utc::now());
        Some(best.clone())
    }

    fn fuzzy_case(&self, keyword: &str) -> Option<ExceptionCase> {
        if keyword.is_empty() {
            return None;
        }
        self.cases
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|case| case.error_message.contains(keyword))
            .max_by_key(|case| case.success_count)
    }

    fn reliable_pattern(&self, step: &Step, current_url: Option<&str>) -> Option<ElementPattern> {
        let page_type = PageType::infer(current_url);
        let pattern = self.patterns.get(&(page_type, step.action))?;
        let distinct = step.target.as_deref() != Some(pattern.selector.as_str());
        (pattern.success_rate > self.min_success_rate && distinct).then(|| pattern.value().clone())
    }

    pub fn record_element_pattern(
        &self,
        page_url: Option<&str>,
        action: StepAction,
        selector: &str,
        alternatives: Vec<String>,
    ) {
        let page_type = PageType::infer(page_url);
        let now = Utc::now();
        self.patterns
            .entry((page_type, action))
            .and_modify(|pattern| {
                pattern.usage_count += 1;
                let previous = pattern.success_rate * (pattern.usage_count - 1) as f64;
                pattern.success_rate = (previous + 1.0) / pattern.usage_count as f64;
                pattern.last_success_at = now;
                if pattern.selector != selector && !pattern.alternatives.iter().any(|s| s == selector) {
                    pattern.alternatives.push(selector.to_string());
                }
            })
            .or_insert_with(|| ElementPattern {
                page_type,
                action,
                selector: selector.to_string(),
                alternatives,
                usage_count: 1,
                success_rate: 1.0,
                last_success_at: now,
            });
        self.persist_quietly("pattern");
    }

    /// Alternate locators known for this page type, or generic variants of `original`.
    pub fn suggest_alternative_locators(
        &self,
        page_url: Option<&str>,
        action: StepAction,
        original: &str,
    ) -> Vec<String> {
        let page_type = PageType::infer(page_url);
        if let Some(pattern) = self.patterns.get(&(page_type, action)) {
            if !pattern.alternatives.is_empty() {
                return pattern.alternatives.clone();
            }
        }

        let mut alternatives = Vec::new();
        if let Some(id) = original.strip_prefix('#') {
            alternatives.push(format!("[id='{id}']"));
            alternatives.push(format!("*[id='{id}']"));
        }
        alternatives.push("input[type='submit']".to_string());
        alternatives.push("button[type='submit']".to_string());
        alternatives.push("form button".to_string());
        alternatives
    }

    pub fn stats(&self) -> KnowledgeStats {
        let lookups = self.metrics.lookups.load(Ordering::Relaxed);
        let hits = self.metrics.hits.load(Ordering::Relaxed);
        let mut all: Vec<ExceptionCase> = self
            .cases
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| b.success_count.cmp(&a.success_count));
        let exception_cases = all.len() as u64;
        all.truncate(10);
        KnowledgeStats {
            exception_cases,
            element_patterns: self.patterns.len() as u64,
            lookups,
            hits,
            misses: self.metrics.misses.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            top_solutions: all,
        }
    }

    pub fn persist_now(&self) -> io::Result<()> {
        self.persist_to_disk()
    }

    fn persist_quietly(&self, reason: &str) {
        if let Err(err) = self.persist_to_disk() {
            warn!(error = %err, reason, "knowledge-center persist failed");
        }
    }

    fn persist_to_disk(&self) -> io::Result<()> {
        let Some(path) = self.storage_path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored = PersistedKnowledge {
            cases: self
                .cases
                .iter()
                .flat_map(|entry| entry.value().clone())
                .collect(),
            patterns: self
                .patterns
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&stored)
            .map_err(|err| io::Error::new(ErrorKind::Other, format!("{err}")))?;
        fs::write(path, json)
    }
}

pub type SharedKnowledgeCenter = Arc<KnowledgeCenter>;

#[async_trait]
impl KnowledgeBase for KnowledgeCenter {
    async fn find_solution(
        &self,
        failure: &FailureReport,
        step: &Step,
        current_url: Option<&str>,
    ) -> Option<Suggestion> {
        let found = if let Some(case) = self.exact_case(&failure.kind, step.action) {
            info!(
                success_count = case.success_count,
                solution = ?case.solution,
                "matched historical solution"
            );
            Some(case.solution)
        } else if let Some(case) = self.fuzzy_case(&page::extract_keyword(&failure.message)) {
            info!(solution = ?case.solution, "matched solution by keyword");
            Some(case.solution)
        } else if let Some(pattern) = self.reliable_pattern(step, current_url) {
            info!(
                success_rate = pattern.success_rate,
                selector = %pattern.selector,
                "suggesting reliable element pattern"
            );
            Some(Suggestion::AlternateLocator {
                selector: pattern.selector,
            })
        } else {
            None
        };
        self.metrics.record_lookup(found.is_some());
        found
    }

    async fn record_outcome(
        &self,
        failure: &FailureReport,
        step: &Step,
        applied: &Suggestion,
        current_url: Option<&str>,
    ) {
        let key = (failure.kind.clone(), step.action);
        {
            let mut cases = self.cases.entry(key).or_default();
            if let Some(existing) = cases.iter_mut().find(|case| &case.solution == applied) {
                existing.success_count += 1;
                existing.last_used_at = Some(Utc::now());
            } else {
                cases.push(ExceptionCase {
                    id: Uuid::new_v4().to_string(),
                    error_kind: failure.kind.clone(),
                    error_message: failure.message.clone(),
                    page_url: current_url.map(str::to_string),
                    action: step.action,
                    target: step.target.clone(),
                    solution: applied.clone(),
                    success_count: 1,
                    created_at: Utc::now(),
                    last_used_at: Some(Utc::now()),
                });
            }
        }
        info!(solution = ?applied, action = %step.action, "recorded successful solution");

        if let Suggestion::AlternateLocator { selector } = applied {
            self.record_element_pattern(current_url, step.action, selector, Vec::new());
        } else {
            self.persist_quietly("case");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn locate_failure() -> FailureReport {
        FailureReport::new("locate", "element not found: #login")
    }

    #[tokio::test]
    async fn recorded_outcome_is_found_again_and_ranked() {
        let center = KnowledgeCenter::default();
        let step = Step::click(2, "#login");
        let alt = Suggestion::AlternateLocator {
            selector: "button.login".into(),
        };
        let wait = Suggestion::InsertWait { seconds: 2 };

        center.record_outcome(&locate_failure(), &step, &wait, None).await;
        center.record_outcome(&locate_failure(), &step, &alt, None).await;
        center.record_outcome(&locate_failure(), &step, &alt, None).await;

        let found = center.find_solution(&locate_failure(), &step, None).await;
        assert_eq!(found, Some(alt));
        assert_eq!(center.stats().exception_cases, 2);
        assert_eq!(center.stats().hits, 1);
    }

    #[tokio::test]
    async fn keyword_match_crosses_actions() {
        let center = KnowledgeCenter::default();
        let wait = Suggestion::InsertWait { seconds: 3 };
        center
            .record_outcome(
                &FailureReport::new("timeout", "timeout waiting for reply"),
                &Step::click(1, "#a"),
                &wait,
                None,
            )
            .await;

        let found = center
            .find_solution(
                &FailureReport::new("semantic", "navigation timeout"),
                &Step::input(3, "#q", "rust"),
                None,
            )
            .await;
        assert_eq!(found, Some(wait));
    }

    #[tokio::test]
    async fn patterns_need_high_success_rate_and_a_different_selector() {
        let center = KnowledgeCenter::new(0.7);
        let url = Some("https://a.test/login");
        center.record_element_pattern(url, StepAction::Click, "#submit", vec![]);

        let same = center
            .find_solution(&locate_failure(), &Step::click(1, "#submit"), url)
            .await;
        assert!(same.is_none());

        let other = center
            .find_solution(&locate_failure(), &Step::click(1, "#old"), url)
            .await;
        assert_eq!(
            other,
            Some(Suggestion::AlternateLocator {
                selector: "#submit".into()
            })
        );
        assert_eq!(center.stats().misses, 1);
    }

    #[test]
    fn default_alternatives_derive_from_id_selectors() {
        let center = KnowledgeCenter::default();
        let alts = center.suggest_alternative_locators(None, StepAction::Click, "#go");
        assert_eq!(alts[0], "[id='go']");
        assert!(alts.contains(&"form button".to_string()));
    }

    #[tokio::test]
    async fn persistence_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        {
            let center = KnowledgeCenter::with_persistence(&path, 0.7).unwrap();
            center
                .record_outcome(
                    &locate_failure(),
                    &Step::click(1, "#login"),
                    &Suggestion::AlternateLocator {
                        selector: "#signin".into(),
                    },
                    Some("https://a.test/login"),
                )
                .await;
        }

        let reloaded = KnowledgeCenter::with_persistence(&path, 0.7).unwrap();
        let stats = reloaded.stats();
        assert_eq!(stats.exception_cases, 1);
        assert_eq!(stats.element_patterns, 1);
    }
}
