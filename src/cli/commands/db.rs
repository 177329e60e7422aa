//! Database management commands.

use crate::cli::DbCommands;
use crate::cli::commands::{open_existing_storage, open_storage, print_json};
use crate::config::{self, CliOverrides};
use crate::error::Result;
use crate::format::format_stats;
use crate::model::Stats;
use serde::Serialize;
use std::fs;

#[derive(Serialize)]
struct StatsOutput<'a> {
    path: String,
    size_bytes: u64,
    #[serde(flatten)]
    stats: &'a Stats,
}

/// Execute a database subcommand.
///
/// # Errors
///
/// Returns an error if the database cannot be created or read.
pub fn execute(command: &DbCommands, json: bool, cli: &CliOverrides) -> Result<()> {
    let config = config::load_config(cli)?;
    let path = config.database_path();

    match command {
        DbCommands::Init => {
            let storage = open_storage(&config)?;
            let version = storage.stats()?.schema_version;
            if json {
                print_json(&serde_json::json!({
                    "path": path.display().to_string(),
                    "schema_version": version,
                }))?;
            } else {
                println!("Initialized {} (schema v{version})", path.display());
            }
        }
        DbCommands::Stats => {
            let storage = open_existing_storage(&config)?;
            let stats = storage.stats()?;
            let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let display = path.display().to_string();
            if json {
                print_json(&StatsOutput {
                    path: display,
                    size_bytes,
                    stats: &stats,
                })?;
            } else {
                print!("{}", format_stats(&stats, &display, size_bytes));
            }
        }
        DbCommands::Path => {
            if json {
                print_json(&serde_json::json!({ "path": path.display().to_string() }))?;
            } else {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}
