//! CFD snapshot commands.

use crate::cli::CfdCommands;
use crate::cli::commands::{open_existing_storage, print_json, resolve_repository};
use crate::config::{self, CliOverrides};
use crate::error::Result;
use crate::format::format_cfd;
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
struct SnapshotOutput<'a> {
    repo: &'a str,
    date: String,
    statuses: usize,
}

/// Execute a CFD subcommand.
///
/// # Errors
///
/// Returns an error if the store is missing or the repository is unknown.
pub fn execute(command: &CfdCommands, json: bool, cli: &CliOverrides) -> Result<()> {
    let config = config::load_config(cli)?;
    let now = Utc::now();

    match command {
        CfdCommands::Snapshot { repo } => {
            let mut storage = open_existing_storage(&config)?;
            let repo = resolve_repository(&storage, &config, repo)?;
            let statuses = storage.take_snapshot(repo.id, now)?;
            info!(repo = %repo.full_name, statuses, "Saved CFD snapshot");

            let output = SnapshotOutput {
                repo: &repo.full_name,
                date: now.date_naive().format("%Y-%m-%d").to_string(),
                statuses,
            };
            if json {
                print_json(&output)?;
            } else {
                println!(
                    "Saved snapshot for {} on {} ({} statuses)",
                    output.repo, output.date, output.statuses
                );
            }
        }
        CfdCommands::Show { repo, days } => {
            let storage = open_existing_storage(&config)?;
            let repo = resolve_repository(&storage, &config, repo)?;
            let to = now.date_naive();
            let from = to - Duration::days(i64::from(*days));
            let snapshots = storage.cfd_range(repo.id, from, to)?;

            if json {
                print_json(&snapshots)?;
            } else {
                print!("{}", format_cfd(&snapshots));
            }
        }
    }
    Ok(())
}
