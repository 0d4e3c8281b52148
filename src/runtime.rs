use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, LoggingConfig};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        config.level.parse().context("Invalid log level")?
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    installed.context("Failed to install tracing subscriber")
}

pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
}

/// `--config` path, else `./config/taskpilot.yaml`, else the user config directory.
pub fn resolve_config_path(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    let local = PathBuf::from("config/taskpilot.yaml");
    if local.exists() {
        return Ok(local);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("taskpilot");
    path.push("taskpilot.yaml");
    Ok(path)
}

pub fn load_config(explicit: Option<&PathBuf>) -> Result<LoadedConfig> {
    let path = resolve_config_path(explicit)?;
    if path.exists() {
        info!("Loaded configuration from: {}", path.display());
    } else {
        warn!(
            "Config file not found, using defaults and environment: {}",
            path.display()
        );
    }
    let config = AppConfig::load(Some(&path))?;
    Ok(LoadedConfig { config, path })
}
