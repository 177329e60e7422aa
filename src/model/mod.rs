//! Core data types for `kanban_rust`.
//!
//! This module defines the records mirrored from the issue tracker and the
//! facts derived from them:
//! - `Issue` - A mirrored work item with its flow timings
//! - `FlowStatus` - Kanban columns derived from `status:` labels
//! - `StatusTransition` - Ledger entry for an observed status change
//! - `BlockedPeriod` - Interval during which an issue carried `blocked`
//! - `CfdSnapshot` - Per-day status counts for cumulative flow
//! - `SyncRecord` - Observability row for one sync attempt

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KanbanError;

/// Kanban column an issue currently sits in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowStatus {
    Backlog,
    Ready,
    InProgress,
    Review,
    Testing,
    Done,
    #[serde(untagged)]
    Custom(String),
}

impl FlowStatus {
    /// Board column order, left to right.
    pub const CANONICAL: [Self; 6] = [
        Self::Backlog,
        Self::Ready,
        Self::InProgress,
        Self::Review,
        Self::Testing,
        Self::Done,
    ];

    /// Statuses whose first entry time is stamped on the issue.
    pub const TRACKED: [Self; 5] = [
        Self::Ready,
        Self::InProgress,
        Self::Review,
        Self::Testing,
        Self::Done,
    ];

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Testing => "testing",
            Self::Done => "done",
            Self::Custom(value) => value,
        }
    }

    /// Parse a label value, falling back to a custom column.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "backlog" => Self::Backlog,
            "ready" | "todo" => Self::Ready,
            "in-progress" | "in progress" | "in_progress" | "inprogress" => Self::InProgress,
            "review" | "in-review" | "in review" => Self::Review,
            "testing" | "qa" => Self::Testing,
            "done" => Self::Done,
            other => Self::Custom(other.to_string()),
        }
    }

    #[must_use]
    pub fn is_tracked(&self) -> bool {
        Self::TRACKED.contains(self)
    }

    /// Counts toward active WIP (excludes backlog and done).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Backlog | Self::Done)
    }

    /// Position on the board; custom columns sort after the canonical ones.
    #[must_use]
    pub fn board_rank(&self) -> usize {
        Self::CANONICAL
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::CANONICAL.len())
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = KanbanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(KanbanError::InvalidStatus {
                status: s.to_string(),
            });
        }
        Ok(Self::parse(s))
    }
}

/// Open/closed state as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
}

impl IssueState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueState {
    type Err = KanbanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" | "merged" => Ok(Self::Closed),
            other => Err(KanbanError::validation(
                "state",
                format!("unknown issue state '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    /// `org/name`, unique across the store.
    pub full_name: String,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// A label definition: configured, cached, or listed from the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSpec {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub description: String,
}

impl LabelSpec {
    #[must_use]
    pub fn new(name: &str, color: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            color: color.to_string(),
            description: description.to_string(),
        }
    }
}

/// First-entry timestamps for the tracked statuses.
///
/// Each field is written at most once; later observations never replace it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntries {
    pub ready: Option<DateTime<Utc>>,
    pub in_progress: Option<DateTime<Utc>>,
    pub review: Option<DateTime<Utc>>,
    pub testing: Option<DateTime<Utc>>,
    pub done: Option<DateTime<Utc>>,
}

impl StatusEntries {
    fn slot_mut(&mut self, status: &FlowStatus) -> Option<&mut Option<DateTime<Utc>>> {
        match status {
            FlowStatus::Ready => Some(&mut self.ready),
            FlowStatus::InProgress => Some(&mut self.in_progress),
            FlowStatus::Review => Some(&mut self.review),
            FlowStatus::Testing => Some(&mut self.testing),
            FlowStatus::Done => Some(&mut self.done),
            FlowStatus::Backlog | FlowStatus::Custom(_) => None,
        }
    }

    #[must_use]
    pub fn get(&self, status: &FlowStatus) -> Option<DateTime<Utc>> {
        match status {
            FlowStatus::Ready => self.ready,
            FlowStatus::InProgress => self.in_progress,
            FlowStatus::Review => self.review,
            FlowStatus::Testing => self.testing,
            FlowStatus::Done => self.done,
            FlowStatus::Backlog | FlowStatus::Custom(_) => None,
        }
    }

    /// Record the entry time for `status` if none is known yet.
    ///
    /// Returns `true` when a value was written.
    pub fn stamp_if_unset(&mut self, status: &FlowStatus, at: DateTime<Utc>) -> bool {
        let Some(slot) = self.slot_mut(status) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }

    /// Fill still-empty fields from `other`, keeping every value already set.
    pub fn coalesce(&mut self, other: &Self) {
        for status in &FlowStatus::TRACKED {
            if let Some(at) = other.get(status) {
                self.stamp_if_unset(status, at);
            }
        }
    }
}

/// A mirrored issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub title: String,
    pub state: IssueState,
    pub status: Option<FlowStatus>,
    pub priority: Option<String>,
    pub issue_type: Option<String>,
    pub size: Option<String>,
    pub is_blocked: bool,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub entered: StatusEntries,
    pub lead_time_hours: Option<f64>,
    pub cycle_time_hours: Option<f64>,
    pub blocked_time_hours: f64,
    pub synced_at: DateTime<Utc>,
}

impl Issue {
    /// When the work finished: the close time, or done-entry for open issues.
    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        if self.state.is_closed() {
            self.closed_at.or(self.entered.done)
        } else {
            self.entered.done
        }
    }

    /// Recompute lead and cycle time from stored timestamps.
    ///
    /// Cycle time needs a known in-progress entry; blocked hours are
    /// subtracted and the result never drops below zero.
    pub fn recompute_flow_times(&mut self) {
        let Some(completed) = self.completed_at() else {
            self.lead_time_hours = None;
            self.cycle_time_hours = None;
            return;
        };

        self.lead_time_hours = Some(hours_between(self.created_at, completed).max(0.0));
        self.cycle_time_hours = self.entered.in_progress.map(|started| {
            (hours_between(started, completed) - self.blocked_time_hours).max(0.0)
        });
    }
}

/// Fractional hours from `start` to `end`.
#[must_use]
pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}

/// Ledger entry for one observed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: i64,
    pub issue_id: i64,
    /// Empty for the initial observation.
    pub from_status: Option<String>,
    pub to_status: String,
    pub transitioned_at: DateTime<Utc>,
}

/// Where a blocked interval was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedSource {
    /// The `blocked` label was seen toggling between syncs.
    Label,
    /// Derived from the tracker's label timeline.
    Timeline,
}

impl BlockedSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Timeline => "timeline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedPeriod {
    pub id: i64,
    pub issue_id: i64,
    pub blocked_at: DateTime<Utc>,
    /// `None` while still blocked as of the last sync.
    pub unblocked_at: Option<DateTime<Utc>>,
    pub duration_hours: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfdSnapshot {
    pub repo_id: i64,
    pub snapshot_date: NaiveDate,
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = KanbanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(KanbanError::validation(
                "sync_history.status",
                format!("unknown sync status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: i64,
    /// `None` for the run-wide record.
    pub repo_id: Option<i64>,
    pub sync_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub items_synced: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub is_draft: bool,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub merge_time_hours: Option<f64>,
}

/// One card on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardIssue {
    pub repo: String,
    pub number: i64,
    pub title: String,
    pub state: IssueState,
    pub status: Option<FlowStatus>,
    pub priority: Option<String>,
    pub issue_type: Option<String>,
    pub size: Option<String>,
    pub is_blocked: bool,
    pub assignee: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub age_days: f64,
}

/// Board cards sharing one status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardColumn {
    pub status: String,
    pub issues: Vec<BoardIssue>,
}

impl BoardColumn {
    /// Group cards into columns in board order; unclassified cards go last
    /// under `none`.
    #[must_use]
    pub fn group(issues: Vec<BoardIssue>) -> Vec<Self> {
        let mut columns: Vec<(usize, Self)> = Vec::new();
        for issue in issues {
            let (rank, name) = issue.status.as_ref().map_or_else(
                || (usize::MAX, "none".to_string()),
                |s| (s.board_rank(), s.as_str().to_string()),
            );
            if let Some((_, column)) = columns.iter_mut().find(|(_, c)| c.status == name) {
                column.issues.push(issue);
            } else {
                columns.push((
                    rank,
                    Self {
                        status: name,
                        issues: vec![issue],
                    },
                ));
            }
        }
        columns.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.status.cmp(&b.status)));
        columns.into_iter().map(|(_, column)| column).collect()
    }
}

/// Diagnostic counters over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub organizations: i64,
    pub repositories: i64,
    pub issues: i64,
    pub open_issues: i64,
    pub closed_issues: i64,
    pub pull_requests: i64,
    pub transitions: i64,
    pub blocked_periods: i64,
    pub cfd_snapshots: i64,
    pub sync_records: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_org: Option<String>,
    pub schema_version: i32,
}
