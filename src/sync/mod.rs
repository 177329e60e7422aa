//! Concurrent sync of remote repositories into the local store.
//!
//! This module handles:
//! - Target resolution (explicit names, configured list, or remote listing)
//! - Label push, skipped when the cached label set already matches
//! - Issue reconciliation with per-issue isolation
//! - Optional pull-request linking and timeline refinement
//! - Per-repository and run-wide sync records, plus the daily CFD snapshot
//! - Read-only label audits against the configured set
//!
//! Workers run on scoped threads, at most `concurrency` at a time. The store
//! is a single connection behind a mutex; remote calls never hold the lock.

mod audit;

pub use audit::{LabelAudit, RepoAudit, audit_repositories, label_audit};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::RepositoriesConfig;
use crate::error::{KanbanError, Result};
use crate::model::{LabelSpec, Repository, SyncStatus};
use crate::reconcile::{issue_record, resolve_timeline};
use crate::storage::{LAST_SYNC_ORG_KEY, SqliteStorage};
use crate::tracker::{IssueTracker, RawIssue};

/// Default page size for issue listing.
pub const DEFAULT_ISSUE_LIMIT: usize = 500;
/// Default page size for pull-request listing.
pub const DEFAULT_PR_LIMIT: usize = 200;
/// Default number of repositories synced in parallel.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// What a sync run does.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Desired label set pushed to every repository.
    pub labels: Vec<LabelSpec>,
    pub sync_labels: bool,
    pub sync_issues: bool,
    pub with_prs: bool,
    /// One extra remote call per classified issue.
    pub with_timeline: bool,
    pub issue_limit: usize,
    pub pr_limit: usize,
    /// Also fetch issues closed in the last N days, beyond the page limit.
    pub closed_days: Option<u32>,
    pub concurrency: usize,
    /// Take today's CFD snapshot after a repository syncs, if missing.
    pub snapshot: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            sync_labels: true,
            sync_issues: true,
            with_prs: false,
            with_timeline: false,
            issue_limit: DEFAULT_ISSUE_LIMIT,
            pr_limit: DEFAULT_PR_LIMIT,
            closed_days: None,
            concurrency: DEFAULT_CONCURRENCY,
            snapshot: true,
        }
    }
}

impl SyncOptions {
    fn sync_type(&self) -> &'static str {
        match (self.sync_labels, self.sync_issues) {
            (true, true) => "full",
            (true, false) => "labels",
            (false, true) => "issues",
            (false, false) => "none",
        }
    }
}

/// Outcome for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSyncResult {
    pub repo: String,
    pub state: SyncStatus,
    pub issues: usize,
    pub prs: usize,
    pub labels_changed: usize,
    /// Items that failed individually and were skipped.
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepoSyncResult {
    fn new(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            state: SyncStatus::Running,
            issues: 0,
            prs: 0,
            labels_changed: 0,
            skipped: 0,
            error: None,
        }
    }
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub repos: Vec<RepoSyncResult>,
    pub total_issues: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn failed_repos(&self) -> usize {
        self.repos
            .iter()
            .filter(|r| r.state == SyncStatus::Failed)
            .count()
    }
}

/// Counters shared by all workers.
#[derive(Default)]
struct Tally {
    results: Vec<(usize, RepoSyncResult)>,
    total_issues: usize,
    errors: Vec<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A worker that panicked mid-write rolled its transaction back.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Match a repository name against `*`, `prefix*`, `*suffix` or an exact name.
#[must_use]
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(suffix), _) if !suffix.contains('*') => name.ends_with(suffix),
        (_, Some(prefix)) if !prefix.contains('*') => name.starts_with(prefix),
        _ => pattern == name,
    }
}

/// Keep names matching any include pattern (all when none) and no exclude.
#[must_use]
pub fn filter_repositories(names: Vec<String>, include: &[String], exclude: &[String]) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| include.is_empty() || include.iter().any(|p| matches_pattern(p, name)))
        .filter(|name| !exclude.iter().any(|p| matches_pattern(p, name)))
        .collect()
}

/// Decide which repositories to sync: explicit names, else the configured
/// list, else the remote listing filtered by include/exclude patterns.
///
/// # Errors
///
/// Returns [`KanbanError::NoRepositories`] when nothing is left, or the
/// tracker error if the remote listing fails.
pub fn resolve_targets(
    tracker: &dyn IssueTracker,
    org: &str,
    explicit: &[String],
    config: &RepositoriesConfig,
) -> Result<Vec<String>> {
    let mut names = if !explicit.is_empty() {
        explicit.to_vec()
    } else if !config.list.is_empty() {
        config.list.clone()
    } else {
        let remote = tracker.list_repositories(org)?;
        debug!(org, count = remote.len(), "Listed remote repositories");
        filter_repositories(remote, &config.include, &config.exclude)
    };

    let mut seen = HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    if names.is_empty() {
        return Err(KanbanError::NoRepositories);
    }
    Ok(names)
}

/// Sync every repository in `repos` and return the aggregate report.
///
/// Per-repository failures are collected, not raised. Preconditions fail
/// before any remote call.
///
/// # Errors
///
/// Returns [`KanbanError::NoRepositories`] or [`KanbanError::NoLabels`] for
/// unmet preconditions, or a database error writing the run-wide record.
pub fn run_sync(
    tracker: &dyn IssueTracker,
    storage: &mut SqliteStorage,
    org: &str,
    repos: &[String],
    options: &SyncOptions,
    progress: &ProgressBar,
) -> Result<SyncReport> {
    if repos.is_empty() {
        return Err(KanbanError::NoRepositories);
    }
    if options.sync_labels && options.labels.is_empty() {
        return Err(KanbanError::NoLabels);
    }

    let started = Utc::now();
    let run_id = storage.record_sync_start(None, "all", started)?;
    let workers = options.concurrency.clamp(1, repos.len());
    info!(org, repos = repos.len(), workers, "Starting sync");
    progress.set_length(repos.len() as u64);

    let store = Mutex::new(&mut *storage);
    let tally = Mutex::new(Tally::default());
    let next = AtomicUsize::new(0);
    let worker = RepoWorker {
        tracker,
        store: &store,
        org,
        options,
    };

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(name) = repos.get(idx) else { break };
                    progress.set_message(name.clone());
                    let (result, errors) = worker.sync(name);

                    let mut t = lock(&tally);
                    t.total_issues += result.issues;
                    t.errors.extend(errors);
                    t.results.push((idx, result));
                    drop(t);
                    progress.inc(1);
                }
            });
        }
    });

    let Tally {
        mut results,
        total_issues,
        errors,
    } = tally.into_inner().unwrap_or_else(PoisonError::into_inner);
    results.sort_by_key(|(idx, _)| *idx);
    let report = SyncReport {
        repos: results.into_iter().map(|(_, r)| r).collect(),
        total_issues,
        errors,
    };

    let finished = Utc::now();
    let items = i64::try_from(report.total_issues).unwrap_or(i64::MAX);
    if report.failed_repos() == report.repos.len() {
        storage.record_sync_failed(run_id, items, &report.errors.join("; "), finished)?;
    } else {
        let message = (!report.errors.is_empty()).then(|| report.errors.join("; "));
        storage.record_sync_complete(run_id, items, message.as_deref(), finished)?;
    }
    storage.set_metadata(LAST_SYNC_ORG_KEY, org)?;

    info!(
        total_issues = report.total_issues,
        errors = report.errors.len(),
        failed = report.failed_repos(),
        "Sync finished"
    );
    Ok(report)
}

struct RepoWorker<'a, 's> {
    tracker: &'a dyn IssueTracker,
    store: &'a Mutex<&'s mut SqliteStorage>,
    org: &'a str,
    options: &'a SyncOptions,
}

impl RepoWorker<'_, '_> {
    /// Sync one repository; returns its result and the errors to report.
    fn sync(&self, name: &str) -> (RepoSyncResult, Vec<String>) {
        let full_name = format!("{}/{name}", self.org);
        let span = info_span!("repo", repo = %full_name);
        let _guard = span.enter();
        let now = Utc::now();
        let mut result = RepoSyncResult::new(&full_name);
        let mut errors = Vec::new();

        let repo = match lock(self.store).get_or_create_repo(self.org, name) {
            Ok(repo) => repo,
            Err(e) => {
                let message = format!("{full_name}: {e}");
                warn!(error = %e, "Could not resolve repository");
                result.state = SyncStatus::Failed;
                result.error = Some(message.clone());
                return (result, vec![message]);
            }
        };

        let sync_id = lock(self.store)
            .record_sync_start(Some(repo.id), self.options.sync_type(), now)
            .map_err(|e| warn!(error = %e, "Could not record sync start"))
            .ok();

        if self.options.sync_labels {
            match self.sync_labels(&repo, name, now) {
                Ok(changed) => result.labels_changed = changed,
                Err(e) => {
                    warn!(error = %e, "Label sync failed");
                    errors.push(format!("{full_name} labels: {e}"));
                }
            }
        }

        let mut fatal = None;
        if self.options.sync_issues {
            match self.fetch_issues(name, &mut errors, &full_name) {
                Ok(issues) => self.reconcile_issues(&repo, name, &issues, now, &mut result),
                Err(e) => {
                    warn!(error = %e, "Issue fetch failed");
                    fatal = Some(format!("{full_name} issues: {e}"));
                }
            }
        }

        if self.options.with_prs && fatal.is_none() {
            if let Err(e) = self.sync_pull_requests(&repo, name, now, &mut result) {
                warn!(error = %e, "Pull request sync failed");
                errors.push(format!("{full_name} prs: {e}"));
            }
        }

        if let Some(message) = fatal {
            errors.insert(0, message);
            result.state = SyncStatus::Failed;
        } else {
            result.state = SyncStatus::Completed;
        }
        let mut note = errors.clone();
        if result.skipped > 0 {
            note.push(format!("{} items skipped", result.skipped));
        }
        result.error = (!note.is_empty()).then(|| note.join("; "));

        self.finish(&repo, sync_id, &result, now);
        info!(
            issues = result.issues,
            prs = result.prs,
            labels_changed = result.labels_changed,
            state = %result.state,
            "Repository synced"
        );
        (result, errors)
    }

    fn finish(
        &self,
        repo: &Repository,
        sync_id: Option<i64>,
        result: &RepoSyncResult,
        now: DateTime<Utc>,
    ) {
        let mut store = lock(self.store);
        let items = i64::try_from(result.issues + result.prs).unwrap_or(i64::MAX);
        let finished = Utc::now();

        if let Some(id) = sync_id {
            let recorded = if result.state == SyncStatus::Failed {
                store.record_sync_failed(id, items, result.error.as_deref().unwrap_or(""), finished)
            } else {
                store.record_sync_complete(id, items, result.error.as_deref(), finished)
            };
            if let Err(e) = recorded {
                warn!(error = %e, "Could not record sync outcome");
            }
        }
        if result.state == SyncStatus::Failed {
            return;
        }

        if let Err(e) = store.update_repo_sync_time(repo.id, finished) {
            warn!(error = %e, "Could not stamp last sync time");
        }
        if self.options.snapshot {
            match store.should_snapshot_today(repo.id, now) {
                Ok(true) => match store.take_snapshot(repo.id, now) {
                    Ok(rows) => debug!(rows, "Took CFD snapshot"),
                    Err(e) => warn!(error = %e, "CFD snapshot failed"),
                },
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Could not check CFD snapshot"),
            }
        }
    }

    /// Push the desired labels when the cache says they differ.
    fn sync_labels(&self, repo: &Repository, name: &str, now: DateTime<Utc>) -> Result<usize> {
        let desired = &self.options.labels;
        if !lock(self.store).labels_need_sync(repo.id, desired)? {
            debug!("Labels up to date");
            return Ok(0);
        }

        let remote: HashMap<String, LabelSpec> = self
            .tracker
            .list_labels(self.org, name)?
            .into_iter()
            .map(|l| (l.name.to_lowercase(), l))
            .collect();

        let mut changed = 0;
        for label in desired {
            match remote.get(&label.name.to_lowercase()) {
                None => {
                    self.tracker.create_label(self.org, name, label)?;
                    changed += 1;
                }
                Some(current)
                    if !current.color.eq_ignore_ascii_case(&label.color)
                        || current.description != label.description =>
                {
                    self.tracker.update_label(self.org, name, label)?;
                    changed += 1;
                }
                Some(_) => {}
            }
        }

        let mut store = lock(self.store);
        for label in desired {
            store.upsert_label(repo.id, label, now)?;
        }
        debug!(changed, "Labels synced");
        Ok(changed)
    }

    /// The issue page, plus recently closed issues when requested. A failed
    /// closed-issue fetch is a partial error.
    fn fetch_issues(
        &self,
        name: &str,
        errors: &mut Vec<String>,
        full_name: &str,
    ) -> Result<Vec<RawIssue>> {
        let mut issues = self
            .tracker
            .list_issues(self.org, name, self.options.issue_limit)?;

        if let Some(days) = self.options.closed_days {
            match self.tracker.list_closed_issues(self.org, name, days) {
                Ok(closed) => {
                    let mut seen: HashSet<i64> = issues.iter().map(|i| i.number).collect();
                    issues.extend(closed.into_iter().filter(|i| seen.insert(i.number)));
                }
                Err(e) => {
                    warn!(error = %e, "Closed issue fetch failed");
                    errors.push(format!("{full_name} closed issues: {e}"));
                }
            }
        }
        Ok(issues)
    }

    fn reconcile_issues(
        &self,
        repo: &Repository,
        name: &str,
        issues: &[RawIssue],
        now: DateTime<Utc>,
        result: &mut RepoSyncResult,
    ) {
        for raw in issues {
            match self.reconcile_issue(repo, name, raw, now) {
                Ok(()) => result.issues += 1,
                Err(e) => {
                    warn!(number = raw.number, error = %e, "Skipping issue");
                    result.skipped += 1;
                }
            }
        }
    }

    fn reconcile_issue(
        &self,
        repo: &Repository,
        name: &str,
        raw: &RawIssue,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = issue_record(raw)?;
        let outcome = lock(self.store).upsert_issue(repo.id, &record, now)?;
        debug!(
            number = raw.number,
            created = outcome.created,
            transitioned = outcome.transitioned,
            "Reconciled issue"
        );

        if self.options.with_timeline && record.status().is_some() {
            let events = self.tracker.timeline(self.org, name, raw.number)?;
            let summary = resolve_timeline(&events, now);
            lock(self.store).apply_timeline(repo, raw.number, &summary, now)?;
        }
        Ok(())
    }

    fn sync_pull_requests(
        &self,
        repo: &Repository,
        name: &str,
        now: DateTime<Utc>,
        result: &mut RepoSyncResult,
    ) -> Result<()> {
        let prs = self
            .tracker
            .list_pull_requests(self.org, name, self.options.pr_limit)?;

        for pr in &prs {
            let pr_id = match lock(self.store).upsert_pull_request(repo.id, pr, now) {
                Ok(id) => id,
                Err(e) => {
                    warn!(number = pr.number, error = %e, "Skipping pull request");
                    result.skipped += 1;
                    continue;
                }
            };
            result.prs += 1;

            match self.tracker.linked_issues(self.org, name, pr.number) {
                Ok(numbers) => {
                    let mut store = lock(self.store);
                    for number in numbers {
                        if let Err(e) = store.link_pr_to_issue(repo.id, pr_id, number) {
                            warn!(pr = pr.number, issue = number, error = %e, "Link failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(number = pr.number, error = %e, "Could not read linked issues");
                    result.skipped += 1;
                }
            }
        }
        Ok(())
    }
}
