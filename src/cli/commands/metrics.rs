//! Metrics command implementation.

use crate::cli::MetricsArgs;
use crate::cli::commands::{open_existing_storage, print_json, resolve_repository};
use crate::config::{self, CliOverrides};
use crate::error::{KanbanError, Result};
use crate::format::format_metrics;
use crate::metrics::{self, KanbanMetrics, MetricsOptions};
use crate::storage::LAST_SYNC_ORG_KEY;
use chrono::Utc;
use tracing::info;

/// Execute the metrics command.
///
/// Without `--repo`, reports every repository in the store; `--all` pools
/// them into a single report instead.
///
/// # Errors
///
/// Returns an error if the store is missing, the repository is unknown, or
/// the window is zero days.
pub fn execute(args: &MetricsArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let config = config::load_config(cli)?;
    let days = args.days.unwrap_or(config.settings.metrics_window_days);
    if days == 0 {
        return Err(KanbanError::validation("days", "must be at least 1"));
    }
    let options = MetricsOptions {
        window_days: days,
        wip_limits: config.settings.wip_limits.clone(),
        assignee: args.assignee.clone(),
    };

    let storage = open_existing_storage(&config)?;
    let repos = match &args.repo {
        Some(name) => vec![resolve_repository(&storage, &config, name)?],
        None => storage.list_repositories()?,
    };
    if repos.is_empty() {
        return Err(KanbanError::NoRepositories);
    }

    let now = Utc::now();
    let reports = if args.all {
        let name = match &config.organization {
            Some(org) => org.clone(),
            None => storage
                .get_metadata(LAST_SYNC_ORG_KEY)?
                .unwrap_or_else(|| "all".to_string()),
        };
        vec![metrics::collect_all(&storage, &repos, &name, &options, now)?]
    } else {
        repos
            .iter()
            .map(|repo| metrics::collect(&storage, repo, &options, now))
            .collect::<Result<Vec<KanbanMetrics>>>()?
    };
    info!(repos = repos.len(), reports = reports.len(), days, "Computed metrics");

    if json {
        match reports.as_slice() {
            [single] if args.repo.is_some() || args.all => print_json(single)?,
            all => print_json(all)?,
        }
        return Ok(());
    }

    let text: Vec<String> = reports.iter().map(format_metrics).collect();
    print!("{}", text.join("\n"));
    Ok(())
}
