use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use taskpilot::runtime::{init_logging, load_config, LoadedConfig};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let LoadedConfig { mut config, path } = load_config(cli.config.as_ref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging, cli.debug)?;

    info!("Starting taskpilot v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration path: {}", path.display());
    let cli_context = CliContext::new(config, path, cli.output);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}
