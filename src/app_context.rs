//! Application context and shared components
//!
//! Wires the registry, bridge, stores, planner and scheduler together once per process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use extensions_bridge::ExtensionsBridge;
use knowledge_center::{KnowledgeBase, KnowledgeCenter};
use taskpilot_planner::{LlmPlanner, Replanner, TextGenerator};
use taskpilot_registry::SessionRegistry;
use taskpilot_scheduler::{SchedulerDeps, TaskScheduler};
use taskpilot_state_center::InMemoryStateCenter;

use crate::config::AppConfig;
use crate::gateway::AgentGateway;
use crate::metrics;

pub struct AppContext {
    config: AppConfig,
    registry: Arc<SessionRegistry>,
    bridge: Arc<ExtensionsBridge>,
    state_center: Arc<InMemoryStateCenter>,
    knowledge: Arc<KnowledgeCenter>,
    planner: Arc<LlmPlanner>,
    scheduler: TaskScheduler,
    gateway: Arc<AgentGateway>,
    shutdown: CancellationToken,
    background_tasks: Vec<JoinHandle<()>>,
}

impl AppContext {
    /// Context whose planner works from rules only. Must be called inside a tokio runtime.
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_generator(config, None)
    }

    pub fn with_generator(
        config: AppConfig,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Result<Self> {
        config.validate()?;
        metrics::register_metrics();

        let registry = Arc::new(SessionRegistry::new());
        let bridge = ExtensionsBridge::new(config.bridge.clone());
        let state_center = Arc::new(InMemoryStateCenter::new(config.state.capacity));
        let knowledge = Arc::new(
            KnowledgeCenter::from_config(&config.knowledge)
                .context("Failed to load knowledge store")?,
        );
        let planner = Arc::new(match generator {
            Some(generator) => LlmPlanner::new(generator, config.planner.clone()),
            None => LlmPlanner::rules_only(config.planner.clone()),
        });

        let knowledge_base: Arc<dyn KnowledgeBase> = knowledge.clone();
        let replanner: Arc<dyn Replanner> = planner.clone();
        let scheduler = TaskScheduler::new(
            config.scheduler.clone(),
            SchedulerDeps {
                registry: registry.clone(),
                channel: bridge.clone(),
                knowledge: Some(knowledge_base),
                replanner: Some(replanner),
                tasks: state_center.clone(),
                log: state_center.clone(),
            },
        );
        let gateway = Arc::new(AgentGateway::new(
            bridge.clone(),
            registry.clone(),
            scheduler.clone(),
        ));

        let shutdown = CancellationToken::new();
        let background_tasks = vec![scheduler.spawn_dispatch_loop(shutdown.clone())];
        info!(
            pool_size = config.scheduler.pool_size,
            dispatch_interval_ms = config.scheduler.dispatch_interval_ms,
            "application context ready"
        );

        Ok(Self {
            config,
            registry,
            bridge,
            state_center,
            knowledge,
            planner,
            scheduler,
            gateway,
            shutdown,
            background_tasks,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn bridge(&self) -> Arc<ExtensionsBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn state_center(&self) -> Arc<InMemoryStateCenter> {
        Arc::clone(&self.state_center)
    }

    pub fn knowledge(&self) -> Arc<KnowledgeCenter> {
        Arc::clone(&self.knowledge)
    }

    pub fn planner(&self) -> Arc<LlmPlanner> {
        Arc::clone(&self.planner)
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn gateway(&self) -> Arc<AgentGateway> {
        Arc::clone(&self.gateway)
    }

    /// Stops the dispatch loop and flushes the stores that have a file behind them.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.background_tasks {
            if let Err(err) = task.await {
                warn!(?err, "background task ended abnormally");
            }
        }
        if let Err(err) = self.knowledge.persist_now() {
            warn!(?err, "failed to persist knowledge store");
        }
        if let Some(path) = &self.config.state.snapshot_path {
            match self.state_center.write_snapshot(path) {
                Ok(()) => info!(path = %path.display(), "state snapshot written"),
                Err(err) => warn!(?err, path = %path.display(), "failed to write state snapshot"),
            }
        }
    }
}
