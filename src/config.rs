//! Application configuration.
//!
//! Values come from an optional YAML file, then `TASKPILOT_*` environment variables with `__`
//! between nesting levels (`TASKPILOT_SCHEDULER__POOL_SIZE=4`). Anything unset keeps its default.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use extensions_bridge::BridgeConfig;
use knowledge_center::KnowledgeConfig;
use taskpilot_planner::PlannerConfig;
use taskpilot_scheduler::SchedulerConfig;

pub const ENV_PREFIX: &str = "TASKPILOT";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of the human formatter.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Execution summaries kept in memory.
    pub capacity: usize,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            snapshot_path: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub bridge: BridgeConfig,
    pub state: StateConfig,
    pub knowledge: KnowledgeConfig,
    pub planner: PlannerConfig,
}

impl AppConfig {
    /// Layers the YAML file (when present) and the environment over the defaults.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("scheduler.replan_markers"),
        );

        builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Rejects values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.pool_size == 0 {
            bail!("scheduler.pool_size must be at least 1");
        }
        if scheduler.dispatch_interval_ms == 0 {
            bail!("scheduler.dispatch_interval_ms must be positive");
        }
        if scheduler.backoff_base_ms > scheduler.backoff_max_ms {
            bail!(
                "scheduler.backoff_base_ms ({}) exceeds scheduler.backoff_max_ms ({})",
                scheduler.backoff_base_ms,
                scheduler.backoff_max_ms
            );
        }
        if self.bridge.max_frame_bytes == 0 {
            bail!("bridge.max_frame_bytes must be positive");
        }
        if self.state.capacity == 0 {
            bail!("state.capacity must be at least 1");
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to render configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.pool_size, 10);
        assert_eq!(config.scheduler.step_timeout_ms, 15_000);
        assert_eq!(config.state.capacity, 512);
        assert_eq!(config.logging.level, "info");
        assert!((config.knowledge.pattern_min_success_rate - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn file_then_environment_layers_apply() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "scheduler:\n  settle_delay_ms: 250\n  pool_size: 3\nlogging:\n  json: true"
        )
        .unwrap();

        std::env::set_var("TASKPILOT_SCHEDULER__POOL_SIZE", "4");
        let config = AppConfig::load(Some(file.path())).unwrap();
        std::env::remove_var("TASKPILOT_SCHEDULER__POOL_SIZE");

        assert_eq!(config.scheduler.settle_delay_ms, 250);
        assert_eq!(config.scheduler.pool_size, 4);
        assert!(config.logging.json);
        assert_eq!(config.scheduler.backoff_base_ms, 1_000);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        assert!(AppConfig::default().validate().is_ok());

        let mut config = AppConfig::default();
        config.scheduler.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.backoff_base_ms = 60_000;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("backoff_base_ms"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/taskpilot.yaml"))).unwrap();
        assert_eq!(config.bridge.max_frame_bytes, 1024 * 1024);
        assert!(config.to_yaml().unwrap().contains("scheduler:"));
    }
}
