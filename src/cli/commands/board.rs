//! Board command implementation.

use crate::cli::BoardArgs;
use crate::cli::commands::{open_existing_storage, print_json, resolve_repository};
use crate::config::{self, CliOverrides};
use crate::error::{KanbanError, Result};
use crate::format::{format_board, terminal_width};
use crate::model::BoardColumn;
use chrono::Utc;
use tracing::debug;

/// Execute the board command.
///
/// # Errors
///
/// Returns an error if the store is missing, the repository is unknown, or
/// the per-column limit is zero.
pub fn execute(args: &BoardArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    if args.limit == Some(0) {
        return Err(KanbanError::validation("limit", "must be at least 1"));
    }
    let config = config::load_config(cli)?;
    let storage = open_existing_storage(&config)?;
    let repo_id = match &args.repo {
        Some(name) => Some(resolve_repository(&storage, &config, name)?.id),
        None => None,
    };

    let mut columns = storage.board(repo_id, args.assignee.as_deref(), Utc::now())?;
    if let Some(limit) = args.limit {
        cap_columns(&mut columns, limit);
    }
    debug!(columns = columns.len(), "Loaded board");

    if json {
        print_json(&columns)
    } else {
        print!("{}", format_board(&columns, terminal_width()));
        Ok(())
    }
}

/// Keep the longest-waiting cards in each column.
fn cap_columns(columns: &mut [BoardColumn], limit: usize) {
    for column in columns {
        column.issues.sort_by(|a, b| b.age_days.total_cmp(&a.age_days));
        column.issues.truncate(limit);
    }
}
