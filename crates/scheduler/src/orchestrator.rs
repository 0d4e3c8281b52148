use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use extensions_bridge::{CommandChannel, Correlation};
use knowledge_center::KnowledgeBase;
use taskpilot_core_types::{
    ExecutionId, ExecutionStatus, TaskDefinition, UserId, WorkerId,
};
use taskpilot_planner::Replanner;
use taskpilot_registry::{SessionStatus, WorkerRegistry};
use taskpilot_state_center::{ExecutionLog, ExecutionSummary, TaskStore};

use crate::context::ExecutionContext;
use crate::correlator::StepReply;
use crate::driver::{DriveOutcome, ExecutionDriver};
use crate::error::SchedulerError;
use crate::executor::StepRunner;
use crate::lane::PendingQueue;
use crate::metrics;
use crate::model::{ExecutionSnapshot, ScheduledTask, SchedulerConfig, TaskSource, IMMEDIATE_PRIORITY};
use crate::recovery::RecoveryPolicy;

/// Collaborators the scheduler is wired to.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub registry: Arc<dyn WorkerRegistry>,
    pub channel: Arc<dyn CommandChannel>,
    pub knowledge: Option<Arc<dyn KnowledgeBase>>,
    pub replanner: Option<Arc<dyn Replanner>>,
    pub tasks: Arc<dyn TaskStore>,
    pub log: Arc<dyn ExecutionLog>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    registry: Arc<dyn WorkerRegistry>,
    tasks: Arc<dyn TaskStore>,
    log: Arc<dyn ExecutionLog>,
    queue: Mutex<PendingQueue>,
    running: DashMap<ExecutionId, Arc<ExecutionContext>>,
    /// Worker ids bound to a running execution. Only written under the queue lock or on finish.
    busy: DashMap<WorkerId, ExecutionId>,
    pool: Arc<Semaphore>,
    driver: Arc<ExecutionDriver>,
    /// Executions are spawned here so dispatch works from threads outside the runtime.
    runtime: Handle,
}

/// Priority queue of tasks bound to idle workers and driven on a bounded pool.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    /// Binds the scheduler to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use [`TaskScheduler::with_runtime`] there.
    pub fn new(config: SchedulerConfig, deps: SchedulerDeps) -> Self {
        Self::with_runtime(config, deps, Handle::current())
    }

    pub fn with_runtime(config: SchedulerConfig, deps: SchedulerDeps, runtime: Handle) -> Self {
        let runner = StepRunner::new(deps.channel, config.clone());
        let recovery = RecoveryPolicy::new(deps.knowledge, deps.replanner, config.clone());
        let pool = Arc::new(Semaphore::new(config.pool_size.max(1)));
        Self {
            inner: Arc::new(SchedulerInner {
                registry: deps.registry,
                tasks: deps.tasks,
                log: deps.log,
                queue: Mutex::new(PendingQueue::new()),
                running: DashMap::new(),
                busy: DashMap::new(),
                pool,
                driver: Arc::new(ExecutionDriver::new(runner, recovery)),
                runtime,
                config,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Queues a task without triggering dispatch.
    pub fn enqueue(&self, task: TaskDefinition, user: UserId, priority: u32) -> ExecutionId {
        let scheduled = ScheduledTask::new(task, user, priority);
        let execution_id = scheduled.execution_id.clone();
        info!(
            target: "scheduler",
            execution = %execution_id,
            user = %scheduled.user_id,
            task = %scheduled.task.name,
            priority,
            steps = scheduled.task.steps.len(),
            "task queued"
        );
        let depth = {
            let mut queue = self.inner.queue.lock();
            queue.push(scheduled);
            queue.len()
        };
        metrics::record_submitted(depth);
        execution_id
    }

    async fn resolve(&self, source: TaskSource) -> Result<TaskDefinition, SchedulerError> {
        match source {
            TaskSource::Inline(task) => Ok(task),
            TaskSource::Stored(id) => {
                let task = self
                    .inner
                    .tasks
                    .load_task(&id)
                    .await?
                    .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))?;
                Ok(match task.id {
                    Some(_) => task,
                    None => task.with_id(id),
                })
            }
        }
    }

    pub async fn submit(
        &self,
        source: TaskSource,
        user: UserId,
        priority: u32,
    ) -> Result<ExecutionId, SchedulerError> {
        let task = self.resolve(source).await?;
        let execution_id = self.enqueue(task, user, priority);
        self.dispatch_tick();
        Ok(execution_id)
    }

    /// Binds pending tasks to idle workers in priority order. Returns how many were launched.
    pub fn dispatch_tick(&self) -> usize {
        let launched: Vec<(Arc<ExecutionContext>, OwnedSemaphorePermit)> = {
            let mut queue = self.inner.queue.lock();
            if queue.is_empty() {
                return 0;
            }
            let mut reserved: HashSet<WorkerId> =
                self.inner.busy.iter().map(|entry| entry.key().clone()).collect();
            let registry = &self.inner.registry;
            let pool = &self.inner.pool;

            let picked = queue.drain_matching(|task| {
                let session = registry.available_session(&task.user_id, &reserved)?;
                let permit = Arc::clone(pool).try_acquire_owned().ok()?;
                reserved.insert(session.worker_id.clone());
                Some((session.worker_id, permit))
            });
            picked
                .into_iter()
                .map(|(task, (worker, permit))| (self.bind(task, worker), permit))
                .collect()
        };

        let count = launched.len();
        for (ctx, permit) in launched {
            self.launch(ctx, permit);
        }
        if count > 0 {
            debug!(target: "scheduler", launched = count, "dispatch tick");
        }
        count
    }

    /// Runs one pending task now, ahead of the queue order.
    ///
    /// On `NoIdleWorker` or `PoolExhausted` the task stays queued.
    pub fn execute_immediately(&self, id: &ExecutionId) -> Result<(), SchedulerError> {
        let (ctx, permit) = {
            let mut queue = self.inner.queue.lock();
            let user = queue
                .get(id)
                .map(|task| task.user_id.clone())
                .ok_or_else(|| SchedulerError::NotPending(id.clone()))?;
            let reserved: HashSet<WorkerId> =
                self.inner.busy.iter().map(|entry| entry.key().clone()).collect();
            let session = self
                .inner
                .registry
                .available_session(&user, &reserved)
                .ok_or_else(|| SchedulerError::NoIdleWorker(user.clone()))?;
            let permit = Arc::clone(&self.inner.pool)
                .try_acquire_owned()
                .map_err(|_| SchedulerError::PoolExhausted)?;
            let task = queue
                .remove(id)
                .ok_or_else(|| SchedulerError::NotPending(id.clone()))?;
            (self.bind(task, session.worker_id), permit)
        };
        self.launch(ctx, permit);
        Ok(())
    }

    /// Queues at the highest priority and tries to start right away.
    ///
    /// When no worker or pool slot is free the task waits in the queue like any other.
    pub async fn run_now(
        &self,
        source: TaskSource,
        user: UserId,
    ) -> Result<ExecutionId, SchedulerError> {
        let task = self.resolve(source).await?;
        let execution_id = self.enqueue(task, user, IMMEDIATE_PRIORITY);
        if let Err(err) = self.execute_immediately(&execution_id) {
            debug!(target: "scheduler", execution = %execution_id, %err, "immediate start deferred");
        }
        Ok(execution_id)
    }

    pub async fn cancel(&self, id: &ExecutionId) -> bool {
        // The queue is checked first: `bind` publishes to `running` while holding its lock.
        let (removed, depth) = {
            let mut queue = self.inner.queue.lock();
            let removed = queue.remove(id);
            (removed, queue.len())
        };
        let Some(task) = removed else {
            let running = self.inner.running.get(id).map(|entry| Arc::clone(entry.value()));
            let Some(ctx) = running else {
                return false;
            };
            ctx.cancel();
            info!(target: "scheduler", execution = %id, "cancellation requested");
            return true;
        };
        metrics::record_pending_cancelled(depth);
        info!(target: "scheduler", execution = %id, "pending task cancelled");
        let now = Utc::now();
        let summary = ExecutionSummary {
            execution_id: task.execution_id,
            task_id: task.task.id,
            task_name: task.task.name,
            user_id: task.user_id,
            worker_id: None,
            status: ExecutionStatus::Cancelled,
            total_steps: task.task.steps.len(),
            results: Vec::new(),
            error: Some("cancelled".to_string()),
            replans: 0,
            started_at: task.submitted_at,
            finished_at: now,
            duration_ms: 0,
        };
        self.append_summary(summary).await;
        true
    }

    pub fn status(&self, id: &ExecutionId) -> Option<ExecutionSnapshot> {
        let pending = self.inner.queue.lock().get(id).map(ExecutionSnapshot::pending);
        if pending.is_some() {
            return pending;
        }
        self.inner.running.get(id).map(|ctx| ctx.snapshot())
    }

    pub fn on_page_changed(&self, worker: &WorkerId, url: &str) {
        let Some(execution) = self.inner.busy.get(worker).map(|entry| entry.value().clone())
        else {
            return;
        };
        if let Some(ctx) = self.inner.running.get(&execution) {
            ctx.set_current_url(url);
        }
    }

    pub fn on_element_located(
        &self,
        worker: &WorkerId,
        correlation: &Correlation,
        found: bool,
        data: Value,
    ) -> bool {
        let reply = if found {
            StepReply::ok("element found")
        } else {
            StepReply::failed("element not found")
        };
        self.resolve_reply(worker, correlation, reply.with_data(data))
    }

    pub fn on_step_completed(
        &self,
        worker: &WorkerId,
        correlation: &Correlation,
        success: bool,
        message: Option<String>,
        error: Option<String>,
        data: Value,
    ) -> bool {
        let reply = StepReply {
            success,
            message,
            error,
            data,
        };
        self.resolve_reply(worker, correlation, reply)
    }

    pub fn on_step_error(
        &self,
        worker: &WorkerId,
        correlation: &Correlation,
        error: String,
        data: Value,
    ) -> bool {
        self.resolve_reply(worker, correlation, StepReply::failed(error).with_data(data))
    }

    /// Hands a reply to the waiting slot.
    ///
    /// Stale or unknown correlations are dropped, as are replies from a worker other than the
    /// one the execution is bound to.
    pub fn resolve_reply(
        &self,
        worker: &WorkerId,
        correlation: &Correlation,
        reply: StepReply,
    ) -> bool {
        let Some(ctx) = self
            .inner
            .running
            .get(&correlation.execution_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            debug!(
                target: "scheduler",
                execution = %correlation.execution_id,
                step = correlation.step_id,
                "reply for unknown execution discarded"
            );
            return false;
        };
        if ctx.worker_id() != worker {
            debug!(
                target: "scheduler",
                execution = %correlation.execution_id,
                step = correlation.step_id,
                worker = %worker,
                bound = %ctx.worker_id(),
                "reply from foreign worker discarded"
            );
            return false;
        }
        ctx.correlator().resolve(correlation.step_id, reply)
    }

    /// Runs `dispatch_tick` on the configured interval until `shutdown` fires.
    pub fn spawn_dispatch_loop(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        self.inner.runtime.spawn(async move {
            let mut ticker = interval(scheduler.inner.config.dispatch_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(target: "scheduler", "dispatch loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        scheduler.dispatch_tick();
                    }
                }
            }
        })
    }

    /// Marks the task assigned and makes it visible as running. Caller holds the queue lock.
    fn bind(&self, mut task: ScheduledTask, worker: WorkerId) -> Arc<ExecutionContext> {
        task.assign(worker.clone());
        let ctx = ExecutionContext::from_assigned(task, worker.clone());
        self.inner
            .busy
            .insert(worker, ctx.execution_id().clone());
        self.inner
            .running
            .insert(ctx.execution_id().clone(), Arc::clone(&ctx));
        ctx
    }

    fn launch(&self, ctx: Arc<ExecutionContext>, permit: OwnedSemaphorePermit) {
        self.inner
            .registry
            .set_status(ctx.worker_id(), SessionStatus::Busy);
        metrics::record_dispatched(self.pending_count(), self.running_count());
        info!(
            target: "scheduler",
            execution = %ctx.execution_id(),
            worker = %ctx.worker_id(),
            user = %ctx.user_id(),
            "execution started"
        );

        let scheduler = self.clone();
        self.inner.runtime.spawn(async move {
            let driver = Arc::clone(&scheduler.inner.driver);
            let driven = Arc::clone(&ctx);
            let runtime = scheduler.inner.runtime.clone();
            let outcome = match runtime.spawn(async move { driver.drive(&driven).await }).await {
                Ok(outcome) => outcome,
                Err(err) => DriveOutcome::failed(format!("execution driver panicked: {err}")),
            };
            drop(permit);
            scheduler.finish(&ctx, outcome).await;
        });
    }

    async fn finish(&self, ctx: &ExecutionContext, outcome: DriveOutcome) {
        ctx.finish(outcome.status, outcome.error.clone());
        ctx.correlator().clear();
        info!(
            target: "scheduler",
            execution = %ctx.execution_id(),
            status = outcome.status.as_str(),
            error = outcome.error.as_deref().unwrap_or(""),
            elapsed_ms = ctx.elapsed_ms(),
            replans = ctx.replans(),
            "execution finished"
        );
        self.append_summary(ctx.summary()).await;

        self.inner.running.remove(ctx.execution_id());
        self.inner
            .busy
            .remove_if(ctx.worker_id(), |_, execution| execution == ctx.execution_id());
        self.inner
            .registry
            .set_status(ctx.worker_id(), SessionStatus::Active);
        metrics::record_finished(outcome.status, self.running_count());
        self.dispatch_tick();
    }

    async fn append_summary(&self, summary: ExecutionSummary) {
        let execution = summary.execution_id.clone();
        if let Err(err) = self.inner.log.append(summary).await {
            warn!(target: "scheduler", execution = %execution, %err, "execution log append failed");
        }
    }
}
