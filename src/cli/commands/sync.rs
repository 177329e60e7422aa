//! Sync command implementation.
//!
//! Resolves target repositories, then pulls labels, issues and optionally
//! pull requests and timelines through the `gh` CLI.

use crate::cli::SyncArgs;
use crate::cli::commands::{open_storage, print_json};
use crate::config::{self, CliOverrides, Config};
use crate::error::{KanbanError, Result};
use crate::format::format_sync_report;
use crate::sync::{SyncOptions, SyncReport, resolve_targets, run_sync};
use crate::tracker::{GhCli, IssueTracker};
use crate::util::progress::{create_progress_bar, create_spinner, should_show_progress};
use tracing::info;

/// Build sync options from flags and configuration.
#[must_use]
pub fn sync_options(args: &SyncArgs, config: &Config) -> SyncOptions {
    SyncOptions {
        labels: config.all_labels(),
        sync_labels: args.sync_labels(),
        sync_issues: true,
        with_prs: args.prs,
        with_timeline: args.timeline,
        issue_limit: config.settings.issue_limit,
        pr_limit: config.settings.pr_limit,
        closed_days: config.settings.closed_days,
        concurrency: config.settings.concurrency,
        snapshot: !args.no_snapshot,
    }
}

/// Execute the sync command.
///
/// # Errors
///
/// Returns an error if configuration is incomplete, the store cannot be
/// opened, or any repository reported an error.
pub fn execute(args: &SyncArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let config = config::load_config(cli)?;
    config.validate()?;
    let org = config.require_organization()?.to_string();
    let options = sync_options(args, &config);
    if options.sync_labels && options.labels.is_empty() {
        return Err(KanbanError::NoLabels);
    }

    let tracker = GhCli::new();
    let report = run(&tracker, &config, &org, &args.repos, &options, json)?;

    if json {
        print_json(&report)?;
    } else {
        print!("{}", format_sync_report(&report));
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(KanbanError::SyncIncomplete {
            count: report.errors.len(),
        })
    }
}

fn run(
    tracker: &dyn IssueTracker,
    config: &Config,
    org: &str,
    explicit: &[String],
    options: &SyncOptions,
    json: bool,
) -> Result<SyncReport> {
    let show = should_show_progress() && !json;

    let spinner = create_spinner("Resolving repositories", show);
    let targets = resolve_targets(tracker, org, explicit, &config.repositories);
    spinner.finish_and_clear();
    let targets = targets?;
    info!(org, count = targets.len(), "Resolved sync targets");

    let mut storage = open_storage(config)?;
    let bar = create_progress_bar(targets.len() as u64, "Syncing", show);
    let report = run_sync(tracker, &mut storage, org, &targets, options, &bar);
    bar.finish_and_clear();
    report
}
