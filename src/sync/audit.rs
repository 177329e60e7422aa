//! Label drift between the configured set and what a repository carries.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::model::LabelSpec;
use crate::tracker::IssueTracker;

/// How a repository's labels differ from the desired set.
///
/// Names compare case-insensitively and are reported as spelled in the
/// desired set (missing, modified) or on the remote (extra), sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelAudit {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    /// Present on both sides with a different color or description.
    pub modified: Vec<String>,
}

impl LabelAudit {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.modified.is_empty()
    }
}

/// Audit result for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoAudit {
    pub repo: String,
    #[serde(flatten)]
    pub audit: LabelAudit,
}

/// Compare remote labels against the desired set.
#[must_use]
pub fn label_audit(remote: &[LabelSpec], desired: &[LabelSpec]) -> LabelAudit {
    let by_name = |labels: &[LabelSpec]| -> BTreeMap<String, LabelSpec> {
        labels
            .iter()
            .map(|l| (l.name.to_lowercase(), l.clone()))
            .collect()
    };
    let remote = by_name(remote);
    let desired = by_name(desired);

    let mut audit = LabelAudit::default();
    for (key, want) in &desired {
        match remote.get(key) {
            None => audit.missing.push(want.name.clone()),
            Some(have)
                if !have.color.eq_ignore_ascii_case(&want.color)
                    || have.description != want.description =>
            {
                audit.modified.push(want.name.clone());
            }
            Some(_) => {}
        }
    }
    audit.extra = remote
        .iter()
        .filter(|(key, _)| !desired.contains_key(*key))
        .map(|(_, l)| l.name.clone())
        .collect();
    audit
}

/// Audit each repository in turn.
///
/// A repository whose labels cannot be listed is skipped with a warning and
/// reported in the second list. With `preserve_unknown`, extra labels are
/// not reported.
pub fn audit_repositories(
    tracker: &dyn IssueTracker,
    org: &str,
    repos: &[String],
    desired: &[LabelSpec],
    preserve_unknown: bool,
) -> (Vec<RepoAudit>, Vec<String>) {
    let mut audits = Vec::with_capacity(repos.len());
    let mut errors = Vec::new();
    for name in repos {
        let full_name = format!("{org}/{name}");
        match tracker.list_labels(org, name) {
            Ok(remote) => {
                let mut audit = label_audit(&remote, desired);
                if preserve_unknown {
                    audit.extra.clear();
                }
                debug!(
                    repo = %full_name,
                    missing = audit.missing.len(),
                    modified = audit.modified.len(),
                    extra = audit.extra.len(),
                    "Audited labels"
                );
                audits.push(RepoAudit {
                    repo: full_name,
                    audit,
                });
            }
            Err(e) => {
                warn!(repo = %full_name, error = %e, "Could not audit labels");
                errors.push(format!("{full_name}: {e}"));
            }
        }
    }
    (audits, errors)
}
