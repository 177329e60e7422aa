//! Turning raw tracker records into store-ready records.
//!
//! Classification is a stateless mapping from label names to the derived
//! `status`/`priority`/`type`/`size`/`blocked` fields, driven by a fixed
//! prefix table.

pub mod timeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{FlowStatus, IssueState};
use crate::tracker::RawIssue;

pub use timeline::{TimelineSummary, resolve_timeline};

/// Label name that marks an issue as blocked.
pub const BLOCKED_LABEL: &str = "blocked";

/// Which derived field a label feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelCategory {
    Status,
    Priority,
    Type,
    Size,
    Blocked,
    Other,
}

impl LabelCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Priority => "priority",
            Self::Type => "type",
            Self::Size => "size",
            Self::Blocked => "blocked",
            Self::Other => "other",
        }
    }
}

const PREFIXES: [(&str, LabelCategory); 5] = [
    ("status:", LabelCategory::Status),
    ("status ", LabelCategory::Status),
    ("priority:", LabelCategory::Priority),
    ("type:", LabelCategory::Type),
    ("size:", LabelCategory::Size),
];

/// Split a label into its category and (lowercased, trimmed) value.
#[must_use]
pub fn categorize(label: &str) -> (LabelCategory, String) {
    let lower = label.trim().to_lowercase();
    if lower == BLOCKED_LABEL {
        return (LabelCategory::Blocked, lower);
    }
    for (prefix, category) in PREFIXES {
        if let Some(rest) = lower.strip_prefix(prefix) {
            let value = rest.trim().to_string();
            if category == LabelCategory::Status && value == BLOCKED_LABEL {
                return (LabelCategory::Blocked, value);
            }
            return (category, value);
        }
    }
    (LabelCategory::Other, lower)
}

/// Derived fields for one issue's label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status: Option<FlowStatus>,
    pub priority: Option<String>,
    pub issue_type: Option<String>,
    pub size: Option<String>,
    pub blocked: bool,
}

/// Classify a label set. The first label of each category wins.
#[must_use]
pub fn classify<S: AsRef<str>>(labels: &[S]) -> Classification {
    let mut out = Classification::default();
    for label in labels {
        let (category, value) = categorize(label.as_ref());
        match category {
            LabelCategory::Blocked => out.blocked = true,
            _ if value.is_empty() => {}
            LabelCategory::Status => {
                out.status.get_or_insert_with(|| FlowStatus::parse(&value));
            }
            LabelCategory::Priority => {
                out.priority.get_or_insert(value);
            }
            LabelCategory::Type => {
                out.issue_type.get_or_insert(value);
            }
            LabelCategory::Size => {
                out.size.get_or_insert(value);
            }
            LabelCategory::Other => {}
        }
    }
    out
}

/// An issue ready for [`crate::storage::SqliteStorage::upsert_issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRecord {
    pub number: i64,
    pub title: String,
    pub state: IssueState,
    pub classification: Classification,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl IssueRecord {
    #[must_use]
    pub const fn status(&self) -> Option<&FlowStatus> {
        self.classification.status.as_ref()
    }
}

/// Build an [`IssueRecord`] from a raw tracker issue.
///
/// A closed issue carrying no status label is treated as `done`.
///
/// # Errors
///
/// Returns an error if the remote state string is not recognised.
pub fn issue_record(raw: &RawIssue) -> crate::Result<IssueRecord> {
    let state: IssueState = raw.state.parse()?;
    let mut classification = classify(raw.labels.as_slice());
    if state.is_closed() && classification.status.is_none() {
        classification.status = Some(FlowStatus::Done);
    }

    Ok(IssueRecord {
        number: raw.number,
        title: raw.title.clone(),
        state,
        classification,
        labels: raw.labels.clone(),
        assignee: raw.assignee.clone().filter(|a| !a.is_empty()),
        created_at: raw.created_at,
        updated_at: raw.updated_at,
        closed_at: if state.is_closed() { raw.closed_at } else { None },
    })
}
