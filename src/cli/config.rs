use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde_json::Value as JsonValue;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file, environment and defaults merged)
    Show,

    /// Get a configuration value by dotted key, e.g. `scheduler.pool_size`
    Get {
        /// Configuration key
        key: String,
    },

    /// Validate configuration
    Validate,
}

pub fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    match args.action {
        ConfigAction::Show => {
            println!(
                "Effective configuration ({}):",
                ctx.config_path().display()
            );
            println!("{}", config.to_yaml()?);
        }
        ConfigAction::Get { key } => {
            let json = serde_json::to_value(config)?;
            match lookup(&json, &key) {
                Some(value) => println!("{}", serde_yaml::to_string(value)?),
                None => bail!("{} not found in configuration", key),
            }
        }
        ConfigAction::Validate => {
            config.validate()?;
            println!("Configuration is valid");
        }
    }
    Ok(())
}

fn lookup<'a>(root: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    key.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(root, |node, segment| node.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_lookup_walks_nested_objects() {
        let root = json!({ "scheduler": { "pool_size": 10 } });
        assert_eq!(lookup(&root, "scheduler.pool_size"), Some(&json!(10)));
        assert!(lookup(&root, "scheduler.missing").is_none());
    }
}
