use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::error;

use taskpilot_core_types::ExecutionStatus;

use crate::executor::StepErrorKind;

lazy_static! {
    static ref SUBMITTED: IntCounter = IntCounter::new(
        "taskpilot_scheduler_submitted_total",
        "Tasks accepted into the pending queue",
    )
    .expect("static metric definition");
    static ref DISPATCHED: IntCounter = IntCounter::new(
        "taskpilot_scheduler_dispatched_total",
        "Tasks bound to a worker",
    )
    .expect("static metric definition");
    static ref COMPLETED: IntCounter = IntCounter::new(
        "taskpilot_scheduler_completed_total",
        "Executions that finished every step",
    )
    .expect("static metric definition");
    static ref FAILED: IntCounter =
        IntCounter::new("taskpilot_scheduler_failed_total", "Executions that failed")
            .expect("static metric definition");
    static ref CANCELLED: IntCounter = IntCounter::new(
        "taskpilot_scheduler_cancelled_total",
        "Executions cancelled while pending or running",
    )
    .expect("static metric definition");
    static ref STEP_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "taskpilot_scheduler_step_failures_total",
            "Failed step attempts by error kind",
        ),
        &["kind"],
    )
    .expect("static metric definition");
    static ref RECOVERIES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "taskpilot_scheduler_recoveries_total",
            "Steps rescued by the recovery chain",
        ),
        &["via"],
    )
    .expect("static metric definition");
    static ref QUEUE_DEPTH: IntGauge =
        IntGauge::new("taskpilot_scheduler_queue_depth", "Pending tasks")
            .expect("static metric definition");
    static ref RUNNING: IntGauge =
        IntGauge::new("taskpilot_scheduler_running", "Executions in flight")
            .expect("static metric definition");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register scheduler metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, SUBMITTED.clone());
    register(registry, DISPATCHED.clone());
    register(registry, COMPLETED.clone());
    register(registry, FAILED.clone());
    register(registry, CANCELLED.clone());
    register(registry, STEP_FAILURES.clone());
    register(registry, RECOVERIES.clone());
    register(registry, QUEUE_DEPTH.clone());
    register(registry, RUNNING.clone());
}

pub fn record_submitted(queue_depth: usize) {
    SUBMITTED.inc();
    QUEUE_DEPTH.set(queue_depth as i64);
}

pub fn record_dispatched(queue_depth: usize, running: usize) {
    DISPATCHED.inc();
    QUEUE_DEPTH.set(queue_depth as i64);
    RUNNING.set(running as i64);
}

pub fn record_finished(status: ExecutionStatus, running: usize) {
    match status {
        ExecutionStatus::Completed => COMPLETED.inc(),
        ExecutionStatus::Failed => FAILED.inc(),
        ExecutionStatus::Cancelled => CANCELLED.inc(),
        ExecutionStatus::Pending | ExecutionStatus::Running => {}
    }
    RUNNING.set(running as i64);
}

pub fn record_pending_cancelled(queue_depth: usize) {
    CANCELLED.inc();
    QUEUE_DEPTH.set(queue_depth as i64);
}

pub fn record_step_failure(kind: StepErrorKind) {
    STEP_FAILURES.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_recovery(via: &str) {
    RECOVERIES.with_label_values(&[via]).inc();
}

#[derive(Clone, Debug, Default)]
pub struct SchedulerMetricsSnapshot {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub queue_depth: i64,
    pub running: i64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        submitted: SUBMITTED.get(),
        dispatched: DISPATCHED.get(),
        completed: COMPLETED.get(),
        failed: FAILED.get(),
        cancelled: CANCELLED.get(),
        queue_depth: QUEUE_DEPTH.get(),
        running: RUNNING.get(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_is_harmless() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_step_failure(StepErrorKind::Timeout);
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "taskpilot_scheduler_step_failures_total"));
    }

    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        record_submitted(1);
        record_finished(ExecutionStatus::Failed, 0);
        let after = snapshot();
        assert!(after.submitted > before.submitted);
        assert!(after.failed > before.failed);
    }
}
