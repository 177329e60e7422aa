//! Timeline resolution: exact status-entry times and blocked intervals.
//!
//! Walks an issue's label events once, in chronological order. The result
//! depends only on the events and `now`, so re-syncing the same timeline
//! produces the same rows.

use chrono::{DateTime, Utc};

use super::{LabelCategory, categorize};
use crate::model::{FlowStatus, StatusEntries, hours_between};
use crate::tracker::{TimelineEvent, TimelineEventKind};

/// One `blocked` interval; `end` is `None` while it is still open.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedInterval {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineSummary {
    /// First `labeled` time per tracked status.
    pub entered: StatusEntries,
    pub blocked: Vec<BlockedInterval>,
    pub total_blocked_hours: f64,
}

fn is_blocked_label(label: &str) -> bool {
    categorize(label).0 == LabelCategory::Blocked
}

/// Resolve a label timeline.
///
/// Re-adding `blocked` while an interval is open keeps the original start;
/// an unmatched removal is ignored.
#[must_use]
pub fn resolve_timeline(events: &[TimelineEvent], now: DateTime<Utc>) -> TimelineSummary {
    let mut ordered: Vec<&TimelineEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.at);

    let mut summary = TimelineSummary::default();
    let mut open_since: Option<DateTime<Utc>> = None;

    for event in ordered {
        match event.kind {
            TimelineEventKind::Labeled if is_blocked_label(&event.label) => {
                open_since.get_or_insert(event.at);
            }
            TimelineEventKind::Labeled => {
                let (category, value) = categorize(&event.label);
                if category == LabelCategory::Status && !value.is_empty() {
                    summary
                        .entered
                        .stamp_if_unset(&FlowStatus::parse(&value), event.at);
                }
            }
            TimelineEventKind::Unlabeled if is_blocked_label(&event.label) => {
                if let Some(start) = open_since.take() {
                    summary.blocked.push(BlockedInterval {
                        start,
                        end: Some(event.at),
                        duration_hours: hours_between(start, event.at),
                    });
                }
            }
            TimelineEventKind::Unlabeled => {}
        }
    }

    if let Some(start) = open_since {
        summary.blocked.push(BlockedInterval {
            start,
            end: None,
            duration_hours: hours_between(start, now).max(0.0),
        });
    }

    summary.total_blocked_hours = summary.blocked.iter().map(|b| b.duration_hours).sum();
    summary
}
