//! `SQLite` storage implementation.

use crate::error::{KanbanError, Result};
use crate::model::{
    BlockedPeriod, BlockedSource, BoardColumn, BoardIssue, FlowStatus, Issue, IssueState,
    LabelSpec, Organization, Repository, StatusEntries, StatusTransition, Stats, SyncRecord,
    SyncStatus, hours_between,
};
use crate::reconcile::{IssueRecord, TimelineSummary, categorize};
use crate::storage::ledger;
use crate::storage::schema::{apply_schema, stored_version};
use crate::tracker::RawPullRequest;
use crate::util::time::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// Metadata key holding the organization of the most recent sync run.
pub const LAST_SYNC_ORG_KEY: &str = "last_sync_org";

const ISSUE_COLUMNS: &str = "id, repo_id, number, title, state, status, priority, issue_type, \
     size, is_blocked, assignee, created_at, updated_at, closed_at, entered_ready_at, \
     entered_in_progress_at, entered_review_at, entered_testing_at, entered_done_at, \
     lead_time_hours, cycle_time_hours, blocked_time_hours, synced_at";

/// SQLite-based storage backend.
///
/// One connection, one writer. Sync workers share it behind a mutex.
#[derive(Debug)]
pub struct SqliteStorage {
    pub(super) conn: Connection,
    path: Option<PathBuf>,
}

/// A status change observed inside a mutation, written before commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransition {
    pub issue_id: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub at: DateTime<Utc>,
}

/// Context for a mutation operation, tracking side effects.
pub struct MutationContext {
    pub op_name: String,
    pub now: DateTime<Utc>,
    pub transitions: Vec<PendingTransition>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            op_name: op_name.to_string(),
            now,
            transitions: Vec::new(),
        }
    }

    pub fn record_transition(
        &mut self,
        issue_id: i64,
        from_status: Option<&str>,
        to_status: &str,
        at: DateTime<Utc>,
    ) {
        self.transitions.push(PendingTransition {
            issue_id,
            from_status: from_status.map(str::to_string),
            to_status: to_status.to_string(),
            at,
        });
    }
}

/// What [`SqliteStorage::upsert_issue`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub issue_id: i64,
    pub created: bool,
    /// A ledger row was appended.
    pub transitioned: bool,
}

impl SqliteStorage {
    /// Open a connection to the database at the given path, creating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        debug!(path = %path.display(), "Opened database");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a database that must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`KanbanError::DatabaseNotFound`] if the file is missing.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KanbanError::DatabaseNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::open(path)
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside an immediate transaction.
    ///
    /// Transitions collected in the context are appended to the ledger
    /// before commit; any error rolls the whole mutation back.
    ///
    /// # Errors
    ///
    /// Returns an error if `f` fails or the transaction cannot commit.
    pub fn mutate<F, R>(&mut self, op: &str, now: DateTime<Utc>, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(op, now);

        let result = f(&tx, &mut ctx)?;

        for t in &ctx.transitions {
            ledger::record_transition(
                &tx,
                t.issue_id,
                t.from_status.as_deref(),
                &t.to_status,
                t.at,
            )?;
        }

        tx.commit()?;
        trace!(op = %ctx.op_name, transitions = ctx.transitions.len(), "Committed");
        Ok(result)
    }

    // ---- metadata ----

    /// Get a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(KanbanError::Database(e)),
        }
    }

    /// Set a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    // ---- organizations & repositories ----

    /// Resolve an organization by name, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn get_or_create_org(&mut self, name: &str) -> Result<Organization> {
        get_or_create_org_in(&self.conn, name)
    }

    /// Resolve `org/name`, creating the organization and repository rows as
    /// needed. Safe to repeat: the natural keys are unique.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn get_or_create_repo(&mut self, org: &str, name: &str) -> Result<Repository> {
        self.mutate("get_or_create_repo", Utc::now(), |tx, _ctx| {
            let org = get_or_create_org_in(tx, org)?;
            let full_name = format!("{}/{name}", org.name);
            tx.execute(
                "INSERT INTO repositories (org_id, name, full_name, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(full_name) DO NOTHING",
                params![org.id, name, full_name, format_timestamp(Utc::now())],
            )?;
            let repo = find_repository_in(tx, &full_name)?.ok_or_else(|| {
                KanbanError::RepositoryNotFound {
                    name: full_name.clone(),
                }
            })?;
            Ok(repo)
        })
    }

    /// Look up a repository by `org/name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_repository(&self, full_name: &str) -> Result<Option<Repository>> {
        find_repository_in(&self.conn, full_name)
    }

    /// Look up a repository by `org/name`, failing if it was never synced.
    ///
    /// # Errors
    ///
    /// Returns [`KanbanError::RepositoryNotFound`] if there is no such row.
    pub fn require_repository(&self, full_name: &str) -> Result<Repository> {
        self.find_repository(full_name)?
            .ok_or_else(|| KanbanError::RepositoryNotFound {
                name: full_name.to_string(),
            })
    }

    /// All known repositories, by full name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, org_id, name, full_name, last_sync_at
             FROM repositories ORDER BY full_name",
        )?;
        let repos = stmt
            .query_map([], repository_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    /// Stamp a repository's last successful sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn update_repo_sync_time(&mut self, repo_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE repositories SET last_sync_at = ?1 WHERE id = ?2",
            params![format_timestamp(at), repo_id],
        )?;
        Ok(())
    }

    // ---- label cache ----

    /// Labels cached for a repository, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn cached_labels(&self, repo_id: i64) -> Result<Vec<LabelSpec>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, color, description FROM labels WHERE repo_id = ?1 ORDER BY name",
        )?;
        let labels = stmt
            .query_map([repo_id], |row| {
                Ok(LabelSpec {
                    name: row.get(0)?,
                    color: row.get(1)?,
                    description: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    /// Whether the desired label set differs from the repository's cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read.
    pub fn labels_need_sync(&self, repo_id: i64, desired: &[LabelSpec]) -> Result<bool> {
        let cached = self.cached_labels(repo_id)?;
        Ok(labels_differ(&cached, desired))
    }

    /// Record a label as present on the remote.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_label(
        &mut self,
        repo_id: i64,
        label: &LabelSpec,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (category, _) = categorize(&label.name);
        self.conn.execute(
            "INSERT INTO labels (repo_id, name, color, description, category, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(repo_id, name) DO UPDATE SET
                 color = excluded.color,
                 description = excluded.description,
                 category = excluded.category,
                 synced_at = excluded.synced_at",
            params![
                repo_id,
                label.name,
                label.color.to_lowercase(),
                label.description,
                category.as_str(),
                format_timestamp(now)
            ],
        )?;
        Ok(())
    }

    // ---- issues ----

    /// Reconcile one fetched issue into the store.
    ///
    /// A new row that already carries a status gets an initial ledger entry
    /// at the record's update time and its first-entry stamp at `now`. An
    /// existing row whose stored status differs gets a ledger entry and
    /// first-entry stamp at `now`. Everything else is overwritten and flow
    /// times are recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; the issue is left untouched.
    pub fn upsert_issue(
        &mut self,
        repo_id: i64,
        record: &IssueRecord,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        self.mutate("upsert_issue", now, |tx, ctx| {
            let incoming = record.status().map(|s| s.as_str().to_string());

            let (mut issue, created, transitioned) =
                match find_issue_in(tx, repo_id, record.number)? {
                    None => {
                        let mut issue = new_issue(repo_id, record, now);
                        issue.id = insert_issue_row(tx, &issue)?;
                        if let (Some(to), Some(status)) = (&incoming, record.status()) {
                            ctx.record_transition(issue.id, None, to, record.updated_at);
                            issue.entered.stamp_if_unset(status, now);
                        }
                        if record.classification.blocked {
                            open_blocked_period(tx, issue.id, now)?;
                        }
                        (issue, true, incoming.is_some())
                    }
                    Some(mut issue) => {
                        // A status regained after a gap continues from the last ledger entry.
                        let previous = match &issue.status {
                            Some(status) => Some(status.as_str().to_string()),
                            None => ledger::last_status(tx, issue.id)?,
                        };
                        let mut transitioned = false;
                        if previous != incoming {
                            if let (Some(to), Some(status)) = (&incoming, record.status()) {
                                ctx.record_transition(issue.id, previous.as_deref(), to, now);
                                issue.entered.stamp_if_unset(status, now);
                                transitioned = true;
                            }
                        }
                        match (issue.is_blocked, record.classification.blocked) {
                            (false, true) => open_blocked_period(tx, issue.id, now)?,
                            (true, false) => close_blocked_periods(tx, issue.id, now)?,
                            _ => {}
                        }
                        apply_record(&mut issue, record);
                        (issue, false, transitioned)
                    }
                };

            issue.synced_at = now;
            issue.blocked_time_hours = blocked_hours_in(tx, issue.id, blocked_reference(&issue, now))?;
            issue.recompute_flow_times();
            write_issue(tx, &issue)?;
            replace_issue_labels(tx, issue.id, &record.labels)?;

            trace!(
                number = record.number,
                created,
                transitioned,
                "Upserted issue"
            );
            Ok(UpsertOutcome {
                issue_id: issue.id,
                created,
                transitioned,
            })
        })
    }

    /// Merge resolved timeline data into an issue.
    ///
    /// First-entry times only fill empty fields. Blocked periods are replaced
    /// by the timeline's intervals, then blocked and flow times recomputed.
    ///
    /// # Errors
    ///
    /// Returns [`KanbanError::IssueNotFound`] if the issue was never upserted.
    pub fn apply_timeline(
        &mut self,
        repo: &Repository,
        number: i64,
        summary: &TimelineSummary,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate("apply_timeline", now, |tx, _ctx| {
            let mut issue =
                find_issue_in(tx, repo.id, number)?.ok_or_else(|| KanbanError::IssueNotFound {
                    repo: repo.full_name.clone(),
                    number,
                })?;

            issue.entered.coalesce(&summary.entered);

            tx.execute("DELETE FROM blocked_periods WHERE issue_id = ?1", [issue.id])?;
            for interval in &summary.blocked {
                tx.execute(
                    "INSERT INTO blocked_periods (issue_id, blocked_at, unblocked_at, duration_hours, reason)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        issue.id,
                        format_timestamp(interval.start),
                        interval.end.map(format_timestamp),
                        interval.end.map(|_| interval.duration_hours),
                        BlockedSource::Timeline.as_str()
                    ],
                )?;
            }

            issue.blocked_time_hours =
                blocked_hours_in(tx, issue.id, blocked_reference(&issue, now))?;
            issue.recompute_flow_times();
            write_issue(tx, &issue)?;
            Ok(())
        })
    }

    /// Fetch one issue with its labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_issue(&self, repo_id: i64, number: i64) -> Result<Option<Issue>> {
        find_issue_in(&self.conn, repo_id, number)
    }

    /// All issues of a repository, by number.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_issues(&self, repo_id: i64) -> Result<Vec<Issue>> {
        self.query_issues(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE repo_id = ?1 ORDER BY number"),
            params![repo_id],
        )
    }

    /// Open issues of a repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn open_issues(&self, repo_id: i64) -> Result<Vec<Issue>> {
        self.query_issues(
            &format!(
                "SELECT {ISSUE_COLUMNS} FROM issues
                 WHERE repo_id = ?1 AND state = 'open' ORDER BY number"
            ),
            params![repo_id],
        )
    }

    /// Issues closed in `[since, until]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn closed_between(
        &self,
        repo_id: i64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Issue>> {
        self.query_issues(
            &format!(
                "SELECT {ISSUE_COLUMNS} FROM issues
                 WHERE repo_id = ?1 AND state = 'closed'
                   AND closed_at >= ?2 AND closed_at <= ?3
                 ORDER BY closed_at"
            ),
            params![repo_id, format_timestamp(since), format_timestamp(until)],
        )
    }

    /// Number of issues created in `[since, until]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn created_between(
        &self,
        repo_id: i64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM issues
             WHERE repo_id = ?1 AND created_at >= ?2 AND created_at <= ?3",
            params![repo_id, format_timestamp(since), format_timestamp(until)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn query_issues(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut issues = stmt
            .query_map(params, issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for issue in &mut issues {
            issue.labels = labels_for(&self.conn, issue.id)?;
        }
        Ok(issues)
    }

    /// Status history of an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn transitions(&self, issue_id: i64) -> Result<Vec<StatusTransition>> {
        ledger::transitions_for(&self.conn, issue_id)
    }

    /// Blocked periods of an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn blocked_periods(&self, issue_id: i64) -> Result<Vec<BlockedPeriod>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, blocked_at, unblocked_at, duration_hours, reason
             FROM blocked_periods WHERE issue_id = ?1 ORDER BY blocked_at, id",
        )?;
        let periods = stmt
            .query_map([issue_id], |row| {
                Ok(BlockedPeriod {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    blocked_at: timestamp_column(row, 2)?,
                    unblocked_at: opt_timestamp_column(row, 3)?,
                    duration_hours: row.get(4)?,
                    reason: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(periods)
    }

    // ---- pull requests ----

    /// Insert or refresh a pull request, returning its row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn upsert_pull_request(
        &mut self,
        repo_id: i64,
        pr: &RawPullRequest,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let merge_time_hours = pr.merged_at.map(|m| hours_between(pr.created_at, m));
        self.conn.execute(
            "INSERT INTO pull_requests (repo_id, number, title, state, is_draft, author,
                 created_at, updated_at, merged_at, closed_at, additions, deletions,
                 changed_files, merge_time_hours, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(repo_id, number) DO UPDATE SET
                 title = excluded.title,
                 state = excluded.state,
                 is_draft = excluded.is_draft,
                 author = excluded.author,
                 updated_at = excluded.updated_at,
                 merged_at = excluded.merged_at,
                 closed_at = excluded.closed_at,
                 additions = excluded.additions,
                 deletions = excluded.deletions,
                 changed_files = excluded.changed_files,
                 merge_time_hours = excluded.merge_time_hours,
                 synced_at = excluded.synced_at",
            params![
                repo_id,
                pr.number,
                pr.title,
                pr.state.to_lowercase(),
                pr.is_draft,
                pr.author,
                format_timestamp(pr.created_at),
                format_timestamp(pr.updated_at),
                pr.merged_at.map(format_timestamp),
                pr.closed_at.map(format_timestamp),
                pr.additions,
                pr.deletions,
                pr.changed_files,
                merge_time_hours,
                format_timestamp(now)
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM pull_requests WHERE repo_id = ?1 AND number = ?2",
            params![repo_id, pr.number],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Link a pull request to an issue of the same repository.
    ///
    /// Returns `false` when the issue is not mirrored locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn link_pr_to_issue(&mut self, repo_id: i64, pr_id: i64, issue_number: i64) -> Result<bool> {
        let issue_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM issues WHERE repo_id = ?1 AND number = ?2",
                params![repo_id, issue_number],
                |row| row.get(0),
            )
            .optional()?;
        let Some(issue_id) = issue_id else {
            return Ok(false);
        };
        self.conn.execute(
            "INSERT OR IGNORE INTO pr_issue_links (pr_id, issue_id) VALUES (?1, ?2)",
            params![pr_id, issue_id],
        )?;
        Ok(true)
    }

    /// Issue numbers linked to a pull request.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn linked_issue_numbers(&self, pr_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.number FROM pr_issue_links l
             JOIN issues i ON i.id = l.issue_id
             WHERE l.pr_id = ?1 ORDER BY i.number",
        )?;
        let numbers = stmt
            .query_map([pr_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(numbers)
    }

    // ---- sync history ----

    /// Open a sync record in `running` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_sync_start(
        &mut self,
        repo_id: Option<i64>,
        sync_type: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_history (repo_id, sync_type, started_at, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                repo_id,
                sync_type,
                format_timestamp(now),
                SyncStatus::Running.as_str()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a sync record as completed, with an optional partial-failure note.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_sync_complete(
        &mut self,
        sync_id: i64,
        items_synced: i64,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.finish_sync(sync_id, SyncStatus::Completed, items_synced, error_message, now)
    }

    /// Close a sync record as failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_sync_failed(
        &mut self,
        sync_id: i64,
        items_synced: i64,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.finish_sync(
            sync_id,
            SyncStatus::Failed,
            items_synced,
            Some(error_message),
            now,
        )
    }

    fn finish_sync(
        &self,
        sync_id: i64,
        status: SyncStatus,
        items_synced: i64,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_history
             SET completed_at = ?1, status = ?2, items_synced = ?3, error_message = ?4
             WHERE id = ?5",
            params![
                format_timestamp(now),
                status.as_str(),
                items_synced,
                error_message,
                sync_id
            ],
        )?;
        Ok(())
    }

    /// Most recent sync records first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_syncs(&self, limit: usize) -> Result<Vec<SyncRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, repo_id, sync_type, started_at, completed_at, status,
                    items_synced, error_message
             FROM sync_history ORDER BY started_at DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                let status: String = row.get(5)?;
                Ok(SyncRecord {
                    id: row.get(0)?,
                    repo_id: row.get(1)?,
                    sync_type: row.get(2)?,
                    started_at: timestamp_column(row, 3)?,
                    completed_at: opt_timestamp_column(row, 4)?,
                    status: status.parse().map_err(|e: KanbanError| {
                        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                    })?,
                    items_synced: row.get(6)?,
                    error_message: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ---- presentation queries ----

    /// Board cards: open issues plus closed ones sitting in `done`.
    ///
    /// `None` for `repo_id` spans every repository; `assignee` matches
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn board_issues(
        &self,
        repo_id: Option<i64>,
        assignee: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BoardIssue>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.full_name, i.number, i.title, i.state, i.status, i.priority,
                    i.issue_type, i.size, i.is_blocked, i.assignee, i.updated_at
             FROM issues i
             JOIN repositories r ON r.id = i.repo_id
             WHERE (?1 IS NULL OR i.repo_id = ?1)
               AND (i.state = 'open' OR i.status = 'done')
               AND (?2 IS NULL OR i.assignee = ?2 COLLATE NOCASE)
             ORDER BY r.full_name, i.number",
        )?;
        let cards = stmt
            .query_map(params![repo_id, assignee], |row| {
                let updated_at = timestamp_column(row, 10)?;
                Ok(BoardIssue {
                    repo: row.get(0)?,
                    number: row.get(1)?,
                    title: row.get(2)?,
                    state: state_column(row, 3)?,
                    status: row
                        .get::<_, Option<String>>(4)?
                        .map(|s| FlowStatus::parse(&s)),
                    priority: row.get(5)?,
                    issue_type: row.get(6)?,
                    size: row.get(7)?,
                    is_blocked: row.get(8)?,
                    assignee: row.get(9)?,
                    updated_at,
                    age_days: hours_between(updated_at, now) / 24.0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    /// Board cards grouped into columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn board(
        &self,
        repo_id: Option<i64>,
        assignee: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BoardColumn>> {
        Ok(BoardColumn::group(self.board_issues(repo_id, assignee, now)?))
    }

    /// Live per-status counts: open issues, or closed ones in `done`.
    /// Unclassified issues are counted under `none`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn status_counts(&self, repo_id: i64) -> Result<BTreeMap<String, i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(status, 'none'), COUNT(*)
             FROM issues
             WHERE repo_id = ?1 AND (state = 'open' OR status = 'done')
             GROUP BY COALESCE(status, 'none')",
        )?;
        let counts = stmt
            .query_map([repo_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }

    /// Row counts and markers for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails.
    pub fn stats(&self) -> Result<Stats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
        };
        let open_issues: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issues WHERE state = 'open'",
            [],
            |row| row.get(0),
        )?;
        let issues = count("issues")?;
        let last_sync_at: Option<String> = self.conn.query_row(
            "SELECT MAX(last_sync_at) FROM repositories",
            [],
            |row| row.get(0),
        )?;

        Ok(Stats {
            organizations: count("organizations")?,
            repositories: count("repositories")?,
            issues,
            open_issues,
            closed_issues: issues - open_issues,
            pull_requests: count("pull_requests")?,
            transitions: ledger::count_transitions(&self.conn)?,
            blocked_periods: count("blocked_periods")?,
            cfd_snapshots: count("cfd_snapshots")?,
            sync_records: count("sync_history")?,
            last_sync_at: last_sync_at.as_deref().and_then(parse_timestamp),
            last_sync_org: self.get_metadata(LAST_SYNC_ORG_KEY)?,
            schema_version: stored_version(&self.conn)?,
        })
    }
}

/// Order-insensitive comparison of label name/color/description triples.
/// Colors compare case-insensitively.
#[must_use]
pub fn labels_differ(cached: &[LabelSpec], desired: &[LabelSpec]) -> bool {
    let key = |l: &LabelSpec| (l.name.clone(), l.color.to_lowercase(), l.description.clone());
    let cached: BTreeSet<_> = cached.iter().map(key).collect();
    let desired: BTreeSet<_> = desired.iter().map(key).collect();
    cached != desired
}

/// Read a required timestamp column.
pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp '{raw}'").into(),
        )
    })
}

fn opt_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map_or(Ok(None), |raw| {
        parse_timestamp(&raw).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                format!("invalid timestamp '{raw}'").into(),
            )
        })
    })
}

fn state_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<IssueState> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: KanbanError| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        full_name: row.get(3)?,
        last_sync_at: opt_timestamp_column(row, 4)?,
    })
}

/// Map a row selected with `ISSUE_COLUMNS`. Labels are loaded separately.
fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        number: row.get(2)?,
        title: row.get(3)?,
        state: state_column(row, 4)?,
        status: row
            .get::<_, Option<String>>(5)?
            .map(|s| FlowStatus::parse(&s)),
        priority: row.get(6)?,
        issue_type: row.get(7)?,
        size: row.get(8)?,
        is_blocked: row.get(9)?,
        assignee: row.get(10)?,
        labels: Vec::new(),
        created_at: timestamp_column(row, 11)?,
        updated_at: timestamp_column(row, 12)?,
        closed_at: opt_timestamp_column(row, 13)?,
        entered: StatusEntries {
            ready: opt_timestamp_column(row, 14)?,
            in_progress: opt_timestamp_column(row, 15)?,
            review: opt_timestamp_column(row, 16)?,
            testing: opt_timestamp_column(row, 17)?,
            done: opt_timestamp_column(row, 18)?,
        },
        lead_time_hours: row.get(19)?,
        cycle_time_hours: row.get(20)?,
        blocked_time_hours: row.get(21)?,
        synced_at: timestamp_column(row, 22)?,
    })
}

fn get_or_create_org_in(conn: &Connection, name: &str) -> Result<Organization> {
    conn.execute(
        "INSERT INTO organizations (name, created_at) VALUES (?1, ?2)
         ON CONFLICT(name) DO NOTHING",
        params![name, format_timestamp(Utc::now())],
    )?;
    let org = conn.query_row(
        "SELECT id, name FROM organizations WHERE name = ?1",
        [name],
        |row| {
            Ok(Organization {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )?;
    Ok(org)
}

fn find_repository_in(conn: &Connection, full_name: &str) -> Result<Option<Repository>> {
    let repo = conn
        .query_row(
            "SELECT id, org_id, name, full_name, last_sync_at
             FROM repositories WHERE full_name = ?1",
            [full_name],
            repository_from_row,
        )
        .optional()?;
    Ok(repo)
}

fn find_issue_in(conn: &Connection, repo_id: i64, number: i64) -> Result<Option<Issue>> {
    let issue = conn
        .query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE repo_id = ?1 AND number = ?2"),
            params![repo_id, number],
            issue_from_row,
        )
        .optional()?;
    match issue {
        Some(mut issue) => {
            issue.labels = labels_for(conn, issue.id)?;
            Ok(Some(issue))
        }
        None => Ok(None),
    }
}

fn labels_for(conn: &Connection, issue_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT label FROM issue_labels WHERE issue_id = ?1 ORDER BY label")?;
    let labels = stmt
        .query_map([issue_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(labels)
}

fn new_issue(repo_id: i64, record: &IssueRecord, now: DateTime<Utc>) -> Issue {
    let mut issue = Issue {
        id: 0,
        repo_id,
        number: record.number,
        title: String::new(),
        state: record.state,
        status: None,
        priority: None,
        issue_type: None,
        size: None,
        is_blocked: false,
        assignee: None,
        labels: Vec::new(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        closed_at: None,
        entered: StatusEntries::default(),
        lead_time_hours: None,
        cycle_time_hours: None,
        blocked_time_hours: 0.0,
        synced_at: now,
    };
    apply_record(&mut issue, record);
    issue
}

/// Overwrite the remote-owned fields of `issue` from `record`.
fn apply_record(issue: &mut Issue, record: &IssueRecord) {
    let c = &record.classification;
    issue.title.clone_from(&record.title);
    issue.state = record.state;
    issue.status.clone_from(&c.status);
    issue.priority.clone_from(&c.priority);
    issue.issue_type.clone_from(&c.issue_type);
    issue.size.clone_from(&c.size);
    issue.is_blocked = c.blocked;
    issue.assignee.clone_from(&record.assignee);
    issue.labels.clone_from(&record.labels);
    issue.created_at = record.created_at;
    issue.updated_at = record.updated_at;
    issue.closed_at = record.closed_at;
}

fn insert_issue_row(tx: &Connection, issue: &Issue) -> Result<i64> {
    tx.execute(
        "INSERT INTO issues (repo_id, number, title, state, created_at, updated_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue.repo_id,
            issue.number,
            issue.title,
            issue.state.as_str(),
            format_timestamp(issue.created_at),
            format_timestamp(issue.updated_at),
            format_timestamp(issue.synced_at)
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Persist every field of `issue`. First-entry columns are only ever filled,
/// never replaced.
fn write_issue(tx: &Connection, issue: &Issue) -> Result<()> {
    let e = &issue.entered;
    tx.execute(
        "UPDATE issues SET
             title = ?2, state = ?3, status = ?4, priority = ?5, issue_type = ?6,
             size = ?7, is_blocked = ?8, assignee = ?9,
             created_at = ?10, updated_at = ?11, closed_at = ?12,
             entered_ready_at = COALESCE(entered_ready_at, ?13),
             entered_in_progress_at = COALESCE(entered_in_progress_at, ?14),
             entered_review_at = COALESCE(entered_review_at, ?15),
             entered_testing_at = COALESCE(entered_testing_at, ?16),
             entered_done_at = COALESCE(entered_done_at, ?17),
             lead_time_hours = ?18, cycle_time_hours = ?19, blocked_time_hours = ?20,
             synced_at = ?21
         WHERE id = ?1",
        params![
            issue.id,
            issue.title,
            issue.state.as_str(),
            issue.status.as_ref().map(FlowStatus::as_str),
            issue.priority,
            issue.issue_type,
            issue.size,
            issue.is_blocked,
            issue.assignee,
            format_timestamp(issue.created_at),
            format_timestamp(issue.updated_at),
            issue.closed_at.map(format_timestamp),
            e.ready.map(format_timestamp),
            e.in_progress.map(format_timestamp),
            e.review.map(format_timestamp),
            e.testing.map(format_timestamp),
            e.done.map(format_timestamp),
            issue.lead_time_hours,
            issue.cycle_time_hours,
            issue.blocked_time_hours,
            format_timestamp(issue.synced_at)
        ],
    )?;
    Ok(())
}

fn replace_issue_labels(tx: &Connection, issue_id: i64, labels: &[String]) -> Result<()> {
    tx.execute("DELETE FROM issue_labels WHERE issue_id = ?1", [issue_id])?;
    let mut stmt =
        tx.prepare("INSERT OR IGNORE INTO issue_labels (issue_id, label) VALUES (?1, ?2)")?;
    for label in labels {
        stmt.execute(params![issue_id, label])?;
    }
    Ok(())
}

fn open_blocked_period(tx: &Connection, issue_id: i64, at: DateTime<Utc>) -> Result<()> {
    let already_open: bool = tx
        .prepare("SELECT 1 FROM blocked_periods WHERE issue_id = ?1 AND unblocked_at IS NULL")?
        .exists([issue_id])?;
    if !already_open {
        tx.execute(
            "INSERT INTO blocked_periods (issue_id, blocked_at, reason) VALUES (?1, ?2, ?3)",
            params![issue_id, format_timestamp(at), BlockedSource::Label.as_str()],
        )?;
    }
    Ok(())
}

fn close_blocked_periods(tx: &Connection, issue_id: i64, at: DateTime<Utc>) -> Result<()> {
    let open: Vec<(i64, String)> = tx
        .prepare("SELECT id, blocked_at FROM blocked_periods WHERE issue_id = ?1 AND unblocked_at IS NULL")?
        .query_map([issue_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (id, blocked_at) in open {
        let duration = parse_timestamp(&blocked_at)
            .map_or(0.0, |start| hours_between(start, at).max(0.0));
        tx.execute(
            "UPDATE blocked_periods SET unblocked_at = ?1, duration_hours = ?2 WHERE id = ?3",
            params![format_timestamp(at), duration, id],
        )?;
    }
    Ok(())
}

/// Time an open blocked period is measured against.
fn blocked_reference(issue: &Issue, now: DateTime<Utc>) -> DateTime<Utc> {
    if issue.state.is_closed() {
        issue.closed_at.unwrap_or(now)
    } else {
        now
    }
}

/// Closed durations plus elapsed time of any open period.
fn blocked_hours_in(conn: &Connection, issue_id: i64, reference: DateTime<Utc>) -> Result<f64> {
    let rows: Vec<(String, Option<f64>)> = conn
        .prepare("SELECT blocked_at, duration_hours FROM blocked_periods WHERE issue_id = ?1")?
        .query_map([issue_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let total = rows
        .iter()
        .map(|(blocked_at, duration)| match duration {
            Some(hours) => *hours,
            None => parse_timestamp(blocked_at)
                .map_or(0.0, |start| hours_between(start, reference).max(0.0)),
        })
        .sum();
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::resolve_timeline;
    use crate::tracker::TimelineEvent;
    use chrono::TimeZone;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours)
    }

    fn record(number: i64, labels: &[&str]) -> IssueRecord {
        let labels: Vec<String> = labels.iter().map(ToString::to_string).collect();
        IssueRecord {
            number,
            title: format!("Issue {number}"),
            state: IssueState::Open,
            classification: crate::reconcile::classify(&labels),
            labels,
            assignee: Some("octocat".to_string()),
            created_at: at(0),
            updated_at: at(1),
            closed_at: None,
        }
    }

    fn closed(mut r: IssueRecord, closed_at: DateTime<Utc>) -> IssueRecord {
        r.state = IssueState::Closed;
        r.closed_at = Some(closed_at);
        if r.classification.status.is_none() {
            r.classification.status = Some(FlowStatus::Done);
        }
        r
    }

    fn setup() -> (SqliteStorage, Repository) {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let repo = storage.get_or_create_repo("acme", "api").unwrap();
        (storage, repo)
    }

    #[test]
    fn test_get_or_create_repo_is_idempotent() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let a = storage.get_or_create_repo("acme", "api").unwrap();
        let b = storage.get_or_create_repo("acme", "api").unwrap();
        let c = storage.get_or_create_repo("acme", "web").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
        assert_eq!(a.org_id, c.org_id);
        assert_eq!(a.full_name, "acme/api");
        assert_eq!(storage.list_repositories().unwrap().len(), 2);
        assert_eq!(storage.stats().unwrap().organizations, 1);
    }

    #[test]
    fn test_require_repository_missing() {
        let storage = SqliteStorage::open_memory().unwrap();
        let err = storage.require_repository("acme/nope").unwrap_err();
        assert!(matches!(err, KanbanError::RepositoryNotFound { .. }));
    }

    #[test]
    fn test_insert_with_status_records_initial_transition() {
        let (mut storage, repo) = setup();
        let outcome = storage
            .upsert_issue(repo.id, &record(1, &["status: ready"]), at(10))
            .unwrap();
        assert!(outcome.created);
        assert!(outcome.transitioned);

        let rows = ledger::transitions_for(&storage.conn, outcome.issue_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].from_status, None);
        assert_eq!(rows[0].to_status, "ready");
        assert_eq!(rows[0].transitioned_at, at(1));

        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert_eq!(issue.entered.ready, Some(at(10)));
        assert_eq!(issue.entered.in_progress, None);
        assert_eq!(issue.labels, vec!["status: ready".to_string()]);
    }

    #[test]
    fn test_insert_without_status_records_nothing() {
        let (mut storage, repo) = setup();
        let outcome = storage.upsert_issue(repo.id, &record(2, &["bug"]), at(10)).unwrap();
        assert!(!outcome.transitioned);
        assert_eq!(ledger::count_transitions(&storage.conn).unwrap(), 0);
    }

    #[test]
    fn test_status_change_stamps_first_entry_once() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(1, &["status: ready"]), at(10)).unwrap();
        storage
            .upsert_issue(repo.id, &record(1, &["status: in-progress"]), at(20))
            .unwrap();
        storage.upsert_issue(repo.id, &record(1, &["status: review"]), at(30)).unwrap();
        let outcome = storage
            .upsert_issue(repo.id, &record(1, &["status: in-progress"]), at(40))
            .unwrap();
        assert!(outcome.transitioned);

        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert_eq!(issue.entered.in_progress, Some(at(20)));
        assert_eq!(issue.entered.review, Some(at(30)));
        assert_eq!(issue.entered.ready, Some(at(10)));
        assert_eq!(ledger::count_transitions(&storage.conn).unwrap(), 4);
    }

    #[test]
    fn test_first_seen_in_progress_keeps_cycle_time() {
        let (mut storage, repo) = setup();
        storage
            .upsert_issue(repo.id, &record(1, &["status: in-progress"]), at(10))
            .unwrap();
        storage
            .upsert_issue(repo.id, &closed(record(1, &["status: done"]), at(48)), at(50))
            .unwrap();

        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert_eq!(issue.entered.in_progress, Some(at(10)));
        assert_eq!(issue.entered.done, Some(at(50)));
        assert_eq!(issue.lead_time_hours, Some(48.0));
        assert!(issue.cycle_time_hours.is_some());
    }

    #[test]
    fn test_unchanged_record_is_a_noop() {
        let (mut storage, repo) = setup();
        let r = record(1, &["status: in-progress", "blocked"]);
        storage.upsert_issue(repo.id, &r, at(10)).unwrap();
        let before = storage.get_issue(repo.id, 1).unwrap().unwrap();

        let outcome = storage.upsert_issue(repo.id, &r, at(10)).unwrap();
        assert!(!outcome.created);
        assert!(!outcome.transitioned);

        let after = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(ledger::count_transitions(&storage.conn).unwrap(), 1);
        assert_eq!(storage.blocked_periods(after.id).unwrap().len(), 1);
    }

    #[test]
    fn test_losing_status_is_not_a_transition() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(1, &["status: ready"]), at(10)).unwrap();
        let outcome = storage.upsert_issue(repo.id, &record(1, &[]), at(20)).unwrap();
        assert!(!outcome.transitioned);
        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert_eq!(issue.status, None);
        assert_eq!(ledger::count_transitions(&storage.conn).unwrap(), 1);
    }

    #[test]
    fn test_regained_status_continues_from_last_ledger_entry() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(1, &["status: ready"]), at(10)).unwrap();
        storage.upsert_issue(repo.id, &record(1, &[]), at(20)).unwrap();
        let outcome = storage
            .upsert_issue(repo.id, &record(1, &["status: review"]), at(30))
            .unwrap();
        assert!(outcome.transitioned);

        let rows = ledger::transitions_for(&storage.conn, outcome.issue_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].from_status.as_deref(), Some("ready"));
        assert_eq!(rows[1].to_status, "review");

        // Coming back to the same status is not a move.
        storage.upsert_issue(repo.id, &record(1, &[]), at(40)).unwrap();
        let again = storage
            .upsert_issue(repo.id, &record(1, &["status: review"]), at(50))
            .unwrap();
        assert!(!again.transitioned);
        assert_eq!(ledger::count_transitions(&storage.conn).unwrap(), 2);
    }

    #[test]
    fn test_blocked_toggle_opens_and_closes_period() {
        let (mut storage, repo) = setup();
        storage
            .upsert_issue(repo.id, &record(1, &["status: in-progress"]), at(10))
            .unwrap();
        storage
            .upsert_issue(repo.id, &record(1, &["status: in-progress", "blocked"]), at(20))
            .unwrap();
        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert!(issue.is_blocked);

        storage
            .upsert_issue(repo.id, &record(1, &["status: in-progress"]), at(26))
            .unwrap();
        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        let periods = storage.blocked_periods(issue.id).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].unblocked_at, Some(at(26)));
        assert_eq!(periods[0].duration_hours, Some(6.0));
        assert_eq!(periods[0].reason, "label");
        assert!((issue.blocked_time_hours - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_flow_times_after_close() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(1, &["status: ready"]), at(10)).unwrap();
        storage
            .upsert_issue(repo.id, &record(1, &["status: in-progress"]), at(24))
            .unwrap();
        storage
            .upsert_issue(repo.id, &closed(record(1, &[]), at(72)), at(80))
            .unwrap();

        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert_eq!(issue.status, Some(FlowStatus::Done));
        assert_eq!(issue.entered.done, Some(at(80)));
        assert_eq!(issue.lead_time_hours, Some(72.0));
        assert_eq!(issue.cycle_time_hours, Some(48.0));
    }

    #[test]
    fn test_closed_without_in_progress_has_no_cycle_time() {
        let (mut storage, repo) = setup();
        storage
            .upsert_issue(repo.id, &closed(record(5, &[]), at(48)), at(50))
            .unwrap();
        let issue = storage.get_issue(repo.id, 5).unwrap().unwrap();
        assert_eq!(issue.lead_time_hours, Some(48.0));
        assert_eq!(issue.cycle_time_hours, None);
    }

    #[test]
    fn test_timeline_backfills_without_overwriting() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(1, &["status: ready"]), at(10)).unwrap();
        storage.upsert_issue(repo.id, &record(1, &["status: review"]), at(50)).unwrap();

        let events = vec![
            TimelineEvent::labeled("status: ready", at(2)),
            TimelineEvent::labeled("status: in-progress", at(4)),
            TimelineEvent::labeled("blocked", at(5)),
            TimelineEvent::unlabeled("blocked", at(7)),
            TimelineEvent::labeled("status: review", at(9)),
        ];
        let summary = resolve_timeline(&events, at(60));
        storage.apply_timeline(&repo, 1, &summary, at(60)).unwrap();
        storage.apply_timeline(&repo, 1, &summary, at(60)).unwrap();

        let issue = storage.get_issue(repo.id, 1).unwrap().unwrap();
        assert_eq!(issue.entered.in_progress, Some(at(4)));
        // Already stamped at sync time; kept.
        assert_eq!(issue.entered.ready, Some(at(10)));
        assert_eq!(issue.entered.review, Some(at(50)));

        let periods = storage.blocked_periods(issue.id).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].reason, "timeline");
        assert!((issue.blocked_time_hours - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_timeline_unknown_issue() {
        let (mut storage, repo) = setup();
        let err = storage
            .apply_timeline(&repo, 404, &TimelineSummary::default(), at(0))
            .unwrap_err();
        assert!(matches!(err, KanbanError::IssueNotFound { number: 404, .. }));
    }

    #[test]
    fn test_labels_differ_is_order_and_color_case_insensitive() {
        let a = vec![
            LabelSpec::new("status: ready", "0E8A16", ""),
            LabelSpec::new("blocked", "b60205", "Waiting"),
        ];
        let b = vec![
            LabelSpec::new("blocked", "b60205", "Waiting"),
            LabelSpec::new("status: ready", "0e8a16", ""),
        ];
        assert!(!labels_differ(&a, &b));
        let c = vec![LabelSpec::new("blocked", "b60205", "Different")];
        assert!(labels_differ(&a, &c));
    }

    #[test]
    fn test_label_cache_round_trip() {
        let (mut storage, repo) = setup();
        let desired = vec![LabelSpec::new("status: ready", "0e8a16", "Ready to pick")];
        assert!(storage.labels_need_sync(repo.id, &desired).unwrap());
        storage.upsert_label(repo.id, &desired[0], at(0)).unwrap();
        assert!(!storage.labels_need_sync(repo.id, &desired).unwrap());

        let category: String = storage
            .conn
            .query_row("SELECT category FROM labels", [], |row| row.get(0))
            .unwrap();
        assert_eq!(category, "status");
    }

    #[test]
    fn test_pull_request_upsert_and_link() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(7, &[]), at(1)).unwrap();
        let pr = RawPullRequest {
            number: 12,
            title: "Fix export".to_string(),
            state: "MERGED".to_string(),
            is_draft: false,
            created_at: at(0),
            updated_at: at(30),
            merged_at: Some(at(30)),
            closed_at: Some(at(30)),
            author: Some("octocat".to_string()),
            additions: 10,
            deletions: 2,
            changed_files: 1,
        };
        let id = storage.upsert_pull_request(repo.id, &pr, at(31)).unwrap();
        let again = storage.upsert_pull_request(repo.id, &pr, at(32)).unwrap();
        assert_eq!(id, again);

        assert!(storage.link_pr_to_issue(repo.id, id, 7).unwrap());
        assert!(storage.link_pr_to_issue(repo.id, id, 7).unwrap());
        assert!(!storage.link_pr_to_issue(repo.id, id, 99).unwrap());
        assert_eq!(storage.linked_issue_numbers(id).unwrap(), vec![7]);

        let merge_hours: f64 = storage
            .conn
            .query_row("SELECT merge_time_hours FROM pull_requests", [], |row| row.get(0))
            .unwrap();
        assert!((merge_hours - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_sync_records_lifecycle() {
        let (mut storage, repo) = setup();
        let all = storage.record_sync_start(None, "all", at(0)).unwrap();
        let one = storage.record_sync_start(Some(repo.id), "issues", at(1)).unwrap();
        storage.record_sync_failed(one, 0, "boom", at(2)).unwrap();
        storage.record_sync_complete(all, 3, Some("1 error"), at(3)).unwrap();

        let records = storage.recent_syncs(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, one);
        assert_eq!(records[0].status, SyncStatus::Failed);
        assert_eq!(records[1].repo_id, None);
        assert_eq!(records[1].status, SyncStatus::Completed);
        assert_eq!(records[1].items_synced, 3);
        assert_eq!(records[1].completed_at, Some(at(3)));
    }

    #[test]
    fn test_board_and_status_counts() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(1, &["status: ready"]), at(2)).unwrap();
        storage.upsert_issue(repo.id, &record(2, &["status: ready"]), at(2)).unwrap();
        storage.upsert_issue(repo.id, &record(3, &[]), at(2)).unwrap();
        storage
            .upsert_issue(repo.id, &closed(record(4, &[]), at(5)), at(6))
            .unwrap();
        storage
            .upsert_issue(repo.id, &closed(record(5, &["status: review"]), at(5)), at(6))
            .unwrap();

        let counts = storage.status_counts(repo.id).unwrap();
        assert_eq!(counts.get("ready"), Some(&2));
        assert_eq!(counts.get("none"), Some(&1));
        assert_eq!(counts.get("done"), Some(&1));
        assert_eq!(counts.get("review"), None);

        let columns = storage.board(Some(repo.id), None, at(49)).unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.status.as_str()).collect();
        assert_eq!(names, vec!["ready", "done", "none"]);
        assert!((columns[0].issues[0].age_days - 2.0).abs() < 1e-9);
        assert_eq!(columns[0].issues[0].repo, "acme/api");
    }

    #[test]
    fn test_board_spans_repos_and_filters_assignee() {
        let (mut storage, api) = setup();
        let web = storage.get_or_create_repo("acme", "web").unwrap();
        storage.upsert_issue(api.id, &record(1, &["status: ready"]), at(2)).unwrap();
        let mut other = record(2, &["status: review"]);
        other.assignee = Some("hubot".to_string());
        storage.upsert_issue(web.id, &other, at(2)).unwrap();
        let mut nobody = record(3, &["status: review"]);
        nobody.assignee = None;
        storage.upsert_issue(web.id, &nobody, at(2)).unwrap();

        let all = storage.board_issues(None, None, at(5)).unwrap();
        let refs: Vec<(&str, i64)> = all.iter().map(|c| (c.repo.as_str(), c.number)).collect();
        assert_eq!(refs, vec![("acme/api", 1), ("acme/web", 2), ("acme/web", 3)]);

        let mine = storage.board(None, Some("OctoCat"), at(5)).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].status, "ready");
        assert_eq!(mine[0].issues[0].repo, "acme/api");

        let theirs = storage.board_issues(Some(web.id), Some("HUBOT"), at(5)).unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].number, 2);
        assert!(storage.board_issues(Some(api.id), Some("hubot"), at(5)).unwrap().is_empty());
    }

    #[test]
    fn test_window_queries() {
        let (mut storage, repo) = setup();
        storage
            .upsert_issue(repo.id, &closed(record(1, &[]), at(10)), at(11))
            .unwrap();
        storage
            .upsert_issue(repo.id, &closed(record(2, &[]), at(100)), at(101))
            .unwrap();
        storage.upsert_issue(repo.id, &record(3, &[]), at(11)).unwrap();

        let closed = storage.closed_between(repo.id, at(50), at(200)).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].number, 2);
        assert_eq!(storage.created_between(repo.id, at(0), at(1)).unwrap(), 3);
        assert_eq!(storage.open_issues(repo.id).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_counts_and_metadata() {
        let (mut storage, repo) = setup();
        storage.upsert_issue(repo.id, &record(1, &["status: ready"]), at(2)).unwrap();
        storage.update_repo_sync_time(repo.id, at(3)).unwrap();
        storage.set_metadata(LAST_SYNC_ORG_KEY, "acme").unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.repositories, 1);
        assert_eq!(stats.issues, 1);
        assert_eq!(stats.open_issues, 1);
        assert_eq!(stats.transitions, 1);
        assert_eq!(stats.last_sync_at, Some(at(3)));
        assert_eq!(stats.last_sync_org.as_deref(), Some("acme"));
        assert_eq!(stats.schema_version, crate::storage::schema::CURRENT_SCHEMA_VERSION);
        assert_eq!(storage.get_metadata("missing").unwrap(), None);
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kanban.db");
        assert!(matches!(
            SqliteStorage::open_existing(&path),
            Err(KanbanError::DatabaseNotFound { .. })
        ));
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.path(), Some(path.as_path()));
        assert!(SqliteStorage::open_existing(&path).is_ok());
    }

    #[test]
    fn test_classification_fields_persist() {
        let (mut storage, repo) = setup();
        let r = record(9, &["priority: high", "type: bug", "size: s"]);
        storage.upsert_issue(repo.id, &r, at(1)).unwrap();
        let issue = storage.get_issue(repo.id, 9).unwrap().unwrap();
        assert_eq!(issue.priority.as_deref(), Some("high"));
        assert_eq!(issue.issue_type.as_deref(), Some("bug"));
        assert_eq!(issue.size.as_deref(), Some("s"));
        assert_eq!(issue.assignee.as_deref(), Some("octocat"));
    }
}
