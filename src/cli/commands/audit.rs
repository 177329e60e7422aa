//! Audit command implementation.
//!
//! Read-only: lists each repository's labels and reports drift from the
//! configured set. Nothing is pushed and the store is not opened.

use crate::cli::AuditArgs;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides};
use crate::error::{KanbanError, Result};
use crate::format::format_audit;
use crate::sync::{audit_repositories, resolve_targets};
use crate::tracker::GhCli;
use tracing::{info, warn};

/// Execute the audit command.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or no repository can be
/// resolved. Repositories whose labels cannot be listed are skipped.
pub fn execute(args: &AuditArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let config = config::load_config(cli)?;
    config.validate()?;
    let org = config.require_organization()?.to_string();
    let desired = config.all_labels();
    if desired.is_empty() {
        return Err(KanbanError::NoLabels);
    }

    let tracker = GhCli::new();
    let targets = resolve_targets(&tracker, &org, &args.repos, &config.repositories)?;
    info!(org, count = targets.len(), "Auditing labels");

    let (audits, errors) = audit_repositories(
        &tracker,
        &org,
        &targets,
        &desired,
        config.settings.preserve_unknown,
    );
    for err in &errors {
        warn!(error = %err, "Skipped repository");
    }

    if json {
        print_json(&audits)
    } else {
        print!("{}", format_audit(&audits));
        Ok(())
    }
}
