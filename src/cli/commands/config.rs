//! Configuration inspection commands.

use crate::cli::ConfigCommands;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides, default_config_path};
use crate::error::Result;
use serde_json::json;
use tracing::debug;

/// Execute a config subcommand.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded, or validation fails.
pub fn execute(command: &ConfigCommands, json: bool, cli: &CliOverrides) -> Result<()> {
    let config = config::load_config(cli)?;
    let source = cli.config.clone().unwrap_or_else(default_config_path);
    debug!(path = %source.display(), "Loaded configuration");

    match command {
        ConfigCommands::Show => {
            if json {
                print_json(&config)?;
            } else {
                println!("# source: {}", source.display());
                println!("# database: {}", config.database_path().display());
                print!("{}", serde_yaml::to_string(&config)?);
            }
        }
        ConfigCommands::Validate => {
            config.validate()?;
            let labels = config.all_labels().len();
            if json {
                print_json(&json!({
                    "valid": true,
                    "path": source.display().to_string(),
                    "organization": config.organization,
                    "labels": labels,
                }))?;
            } else {
                println!("Configuration OK ({labels} labels)");
                if config.organization.is_none() {
                    println!("Note: no organization set; sync will need --org or KANBAN_ORG");
                }
            }
        }
    }
    Ok(())
}
