//! Issue-tracker boundary.
//!
//! The sync layer only sees the [`IssueTracker`] trait and the raw record
//! types below. [`gh::GhCli`] is the production implementation; tests plug
//! in fakes.

pub mod gh;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::LabelSpec;

pub use gh::GhCli;

/// Failure talking to the remote tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Not authenticated with GitHub")]
    NotAuthenticated,

    #[error("GitHub API rate limit exceeded: {message}")]
    RateLimited { message: String },

    #[error("GitHub CLI (gh) is not installed or not on PATH")]
    NotInstalled,

    #[error("Failed to parse tracker response: {message}")]
    Parse { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Rate limits and network hiccups may succeed on a later run.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Io(_))
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// An issue as listed by the tracker, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIssue {
    pub number: i64,
    pub title: String,
    /// `OPEN` / `CLOSED` as reported remotely.
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPullRequest {
    pub number: i64,
    pub title: String,
    pub state: String,
    pub is_draft: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Labeled,
    Unlabeled,
}

/// A label added to or removed from an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub kind: TimelineEventKind,
    pub label: String,
    pub at: DateTime<Utc>,
}

impl TimelineEvent {
    #[must_use]
    pub fn labeled(label: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind: TimelineEventKind::Labeled,
            label: label.to_string(),
            at,
        }
    }

    #[must_use]
    pub fn unlabeled(label: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind: TimelineEventKind::Unlabeled,
            label: label.to_string(),
            at,
        }
    }
}

/// Read and label-maintenance operations against a remote tracker.
///
/// Implementations must be shareable across sync workers.
pub trait IssueTracker: Send + Sync {
    fn list_repositories(&self, org: &str) -> TrackerResult<Vec<String>>;

    fn list_labels(&self, org: &str, repo: &str) -> TrackerResult<Vec<LabelSpec>>;

    fn create_label(&self, org: &str, repo: &str, label: &LabelSpec) -> TrackerResult<()>;

    fn update_label(&self, org: &str, repo: &str, label: &LabelSpec) -> TrackerResult<()>;

    fn list_issues(&self, org: &str, repo: &str, limit: usize) -> TrackerResult<Vec<RawIssue>>;

    fn list_closed_issues(&self, org: &str, repo: &str, days: u32)
    -> TrackerResult<Vec<RawIssue>>;

    fn list_pull_requests(
        &self,
        org: &str,
        repo: &str,
        limit: usize,
    ) -> TrackerResult<Vec<RawPullRequest>>;

    fn linked_issues(&self, org: &str, repo: &str, pr_number: i64) -> TrackerResult<Vec<i64>>;

    fn timeline(&self, org: &str, repo: &str, issue_number: i64)
    -> TrackerResult<Vec<TimelineEvent>>;
}
