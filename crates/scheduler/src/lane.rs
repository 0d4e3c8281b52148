use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use taskpilot_core_types::ExecutionId;

use crate::model::ScheduledTask;

type LaneKey = (Reverse<u32>, u64);

/// Pending tasks ordered by descending priority, FIFO within equal priority.
#[derive(Debug, Default)]
pub struct PendingQueue {
    ordered: BTreeMap<LaneKey, ScheduledTask>,
    index: HashMap<ExecutionId, LaneKey>,
    seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: ScheduledTask) {
        self.seq += 1;
        let key = (Reverse(task.priority), self.seq);
        if let Some(previous) = self.index.insert(task.execution_id.clone(), key) {
            self.ordered.remove(&previous);
        }
        self.ordered.insert(key, task);
    }

    pub fn remove(&mut self, id: &ExecutionId) -> Option<ScheduledTask> {
        let key = self.index.remove(id)?;
        self.ordered.remove(&key)
    }

    pub fn get(&self, id: &ExecutionId) -> Option<&ScheduledTask> {
        self.index.get(id).and_then(|key| self.ordered.get(key))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Walks the queue in dispatch order and removes every task for which `pick` returns a value.
    ///
    /// `pick` sees tasks in order, so it may reserve resources as it goes and decline later ones.
    pub fn drain_matching<T, F>(&mut self, mut pick: F) -> Vec<(ScheduledTask, T)>
    where
        F: FnMut(&ScheduledTask) -> Option<T>,
    {
        let chosen: Vec<(LaneKey, T)> = self
            .ordered
            .iter()
            .filter_map(|(key, task)| pick(task).map(|value| (*key, value)))
            .collect();

        chosen
            .into_iter()
            .filter_map(|(key, value)| {
                let task = self.ordered.remove(&key)?;
                self.index.remove(&task.execution_id);
                Some((task, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpilot_core_types::{Step, TaskDefinition, UserId};

    fn task(name: &str, priority: u32) -> ScheduledTask {
        ScheduledTask::new(
            TaskDefinition::new(name, vec![Step::wait(1, 1)]),
            UserId::from("u1"),
            priority,
        )
    }

    #[test]
    fn higher_priority_first_then_fifo() {
        let mut queue = PendingQueue::new();
        queue.push(task("a", 5));
        queue.push(task("b", 20));
        queue.push(task("c", 5));

        let order: Vec<_> = queue
            .drain_matching(|_| Some(()))
            .into_iter()
            .map(|(t, _)| t.task.name)
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn drain_matching_removes_only_picked_tasks() {
        let mut queue = PendingQueue::new();
        queue.push(task("a", 5));
        queue.push(task("b", 20));
        queue.push(task("c", 5));

        let mut budget = 2;
        let drained = queue.drain_matching(|_| {
            if budget == 0 {
                return None;
            }
            budget -= 1;
            Some(())
        });
        let names: Vec<_> = drained.iter().map(|(t, _)| t.task.name.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(queue.len(), 1);
        let rest = queue.drain_matching(|_| Some(()));
        assert_eq!(rest[0].0.task.name, "c");
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_by_execution_id() {
        let mut queue = PendingQueue::new();
        let first = task("a", 1);
        let id = first.execution_id.clone();
        queue.push(first);
        queue.push(task("b", 1));

        assert!(queue.get(&id).is_some());
        assert_eq!(queue.remove(&id).map(|t| t.task.name), Some("a".to_string()));
        assert!(queue.remove(&id).is_none());
        assert_eq!(queue.len(), 1);
    }
}
