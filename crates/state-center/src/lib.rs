use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::to_writer_pretty;
use thiserror::Error;
use tracing::debug;

use taskpilot_core_types::{
    ExecutionId, ExecutionStatus, PilotError, StepResult, TaskDefinition, TaskId, UserId, WorkerId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store io failure: {0}")]
    Io(String),
}

impl From<StoreError> for PilotError {
    fn from(err: StoreError) -> Self {
        PilotError::new(err.to_string())
    }
}

/// Final record of one execution, appended once when it reaches a terminal status.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub task_name: String,
    pub user_id: UserId,
    #[serde(default)]
    pub worker_id: Option<WorkerId>,
    pub status: ExecutionStatus,
    pub total_steps: usize,
    pub results: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub replans: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionSummary {
    pub fn succeeded_steps(&self) -> usize {
        self.results.iter().filter(|result| result.success).count()
    }
}

/// Append-only sink for execution summaries.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append(&self, summary: ExecutionSummary) -> Result<(), StoreError>;
}

/// Read access to stored task definitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load_task(&self, id: &TaskId) -> Result<Option<TaskDefinition>, StoreError>;
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StateCenterStats {
    pub total_executions: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub steps_recorded: u64,
    pub replans: u64,
}

#[derive(Debug)]
struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }
}

impl<T: Clone> BoundedRing<T> {
    fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// In-memory task table plus ring buffers of recent execution summaries.
pub struct InMemoryStateCenter {
    user_capacity: usize,
    executions: Mutex<BoundedRing<ExecutionSummary>>,
    user_executions: DashMap<UserId, Mutex<BoundedRing<ExecutionSummary>>>,
    tasks: DashMap<TaskId, TaskDefinition>,
    stats: Mutex<StateCenterStats>,
}

#[derive(Serialize)]
struct StateCenterSnapshot {
    stats: StateCenterStats,
    executions: Vec<ExecutionSummary>,
    users: Vec<UserCount>,
    tasks: Vec<TaskDefinition>,
}

#[derive(Serialize)]
struct UserCount {
    user: String,
    count: usize,
}

impl InMemoryStateCenter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            user_capacity: std::cmp::max(capacity / 4, 16),
            executions: Mutex::new(BoundedRing::new(capacity)),
            user_executions: DashMap::new(),
            tasks: DashMap::new(),
            stats: Mutex::new(StateCenterStats::default()),
        }
    }

    /// Stores a task definition, assigning an id when it has none.
    pub fn insert_task(&self, mut task: TaskDefinition) -> TaskId {
        let id = task.id.clone().unwrap_or_default();
        task.id = Some(id.clone());
        self.tasks.insert(id.clone(), task);
        id
    }

    pub fn remove_task(&self, id: &TaskId) -> Option<TaskDefinition> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    pub fn tasks(&self) -> Vec<TaskDefinition> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<ExecutionSummary> {
        self.executions.lock().snapshot()
    }

    pub fn stats(&self) -> StateCenterStats {
        self.stats.lock().clone()
    }

    pub fn recent_user(&self, user: &UserId) -> Vec<ExecutionSummary> {
        self.user_executions
            .get(user)
            .map(|entry| entry.value().lock().snapshot())
            .unwrap_or_default()
    }

    pub fn execution(&self, id: &ExecutionId) -> Option<ExecutionSummary> {
        self.executions
            .lock()
            .data
            .iter()
            .rev()
            .find(|summary| &summary.execution_id == id)
            .cloned()
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let snapshot = StateCenterSnapshot {
            stats: self.stats(),
            executions: self.snapshot(),
            users: self.user_counters(),
            tasks: self.tasks(),
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writer.flush()?;
        Ok(())
    }

    fn user_counters(&self) -> Vec<UserCount> {
        let mut counts: Vec<UserCount> = self
            .user_executions
            .iter()
            .map(|entry| UserCount {
                user: entry.key().to_string(),
                count: entry.value().lock().len(),
            })
            .collect();
        counts.sort_by(|a, b| a.user.cmp(&b.user));
        counts
    }

    fn update_stats(&self, summary: &ExecutionSummary) {
        let mut stats = self.stats.lock();
        stats.total_executions += 1;
        stats.steps_recorded += summary.results.len() as u64;
        stats.replans += u64::from(summary.replans);
        match summary.status {
            ExecutionStatus::Completed => stats.completed += 1,
            ExecutionStatus::Failed => stats.failed += 1,
            ExecutionStatus::Cancelled => stats.cancelled += 1,
            ExecutionStatus::Pending | ExecutionStatus::Running => {}
        }
    }
}

#[async_trait]
impl ExecutionLog for InMemoryStateCenter {
    async fn append(&self, summary: ExecutionSummary) -> Result<(), StoreError> {
        debug!(
            execution_id = %summary.execution_id,
            status = summary.status.as_str(),
            "execution summary recorded"
        );
        self.executions.lock().push(summary.clone());
        self.user_executions
            .entry(summary.user_id.clone())
            .or_insert_with(|| Mutex::new(BoundedRing::new(self.user_capacity)))
            .lock()
            .push(summary.clone());
        self.update_stats(&summary);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryStateCenter {
    async fn load_task(&self, id: &TaskId) -> Result<Option<TaskDefinition>, StoreError> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }
}

/// No-op state center for tests and benchmarks.
pub struct NoopStateCenter;

impl NoopStateCenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl ExecutionLog for NoopStateCenter {
    async fn append(&self, _summary: ExecutionSummary) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TaskStore for NoopStateCenter {
    async fn load_task(&self, _id: &TaskId) -> Result<Option<TaskDefinition>, StoreError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use taskpilot_core_types::Step;
    use tempfile::NamedTempFile;

    fn summary(id: &str, user: &str, status: ExecutionStatus) -> ExecutionSummary {
        let now = Utc::now();
        ExecutionSummary {
            execution_id: ExecutionId::from(id),
            task_id: None,
            task_name: "demo".into(),
            user_id: UserId::from(user),
            worker_id: Some(WorkerId::from("w1")),
            status,
            total_steps: 2,
            results: vec![StepResult::success(1, "ok")],
            error: None,
            replans: 1,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    #[tokio::test]
    async fn ring_is_bounded_and_stats_count_everything() {
        let center = InMemoryStateCenter::new(2);
        center
            .append(summary("e1", "alice", ExecutionStatus::Completed))
            .await
            .unwrap();
        center
            .append(summary("e2", "alice", ExecutionStatus::Failed))
            .await
            .unwrap();
        center
            .append(summary("e3", "bob", ExecutionStatus::Cancelled))
            .await
            .unwrap();

        let recent: Vec<_> = center
            .snapshot()
            .into_iter()
            .map(|s| s.execution_id.0)
            .collect();
        assert_eq!(recent, vec!["e2".to_string(), "e3".to_string()]);
        assert!(center.execution(&ExecutionId::from("e1")).is_none());
        assert_eq!(center.recent_user(&UserId::from("alice")).len(), 2);

        let stats = center.stats();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.replans, 3);
    }

    #[tokio::test]
    async fn tasks_round_trip_through_store() {
        let center = InMemoryStateCenter::new(8);
        let id = center.insert_task(TaskDefinition::new(
            "open",
            vec![Step::navigate(1, "https://example.com")],
        ));

        let loaded = center.load_task(&id).await.unwrap().unwrap();
        assert_eq!(loaded.id.as_ref(), Some(&id));
        assert!(center.load_task(&TaskId::from("missing")).await.unwrap().is_none());
        assert!(center.remove_task(&id).is_some());
        assert!(center.load_task(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_writes_json() {
        let center = InMemoryStateCenter::new(4);
        center
            .append(summary("e1", "alice", ExecutionStatus::Completed))
            .await
            .unwrap();
        let file = NamedTempFile::new().unwrap();
        center.write_snapshot(file.path()).unwrap();

        let written: serde_json::Value =
            serde_json::from_reader(File::open(file.path()).unwrap()).unwrap();
        assert_eq!(written["stats"]["total_executions"], 1);
        assert_eq!(written["executions"][0]["executionId"], "e1");
        assert_eq!(written["users"][0]["user"], "alice");
    }
}
