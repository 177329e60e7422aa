//! Bottleneck heuristics.
//!
//! Each rule is evaluated independently and emitted in a fixed order, so the
//! same figures always produce the same list.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::FlowStatus;
use crate::reconcile::{LabelCategory, categorize};

/// Items older than this many days count as stale.
pub const STALE_AFTER_DAYS: f64 = 14.0;

const OVERLOAD_FACTOR: f64 = 1.5;
const OVERLOAD_MIN_ARRIVAL: f64 = 0.5;
const COLUMN_RATIO: i64 = 2;
const COLUMN_MIN_COUNT: i64 = 2;
const INSTABILITY_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    WipLimit { status: String, count: i64, limit: i64 },
    Overload { arrival: f64, departure: f64 },
    ReviewBottleneck,
    TestingBottleneck,
    StaleItems { count: usize },
    FlowInstability { variance_percent: f64 },
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WipLimit {
                status,
                count,
                limit,
            } => write!(f, "WIP LIMIT: {status} has {count} items (limit: {limit})"),
            Self::Overload { arrival, departure } => write!(
                f,
                "OVERLOAD: Arrival rate ({arrival:.1}/day) > Departure rate ({departure:.1}/day)"
            ),
            Self::ReviewBottleneck => {
                f.write_str("REVIEW BOTTLENECK: Consider prioritizing code reviews")
            }
            Self::TestingBottleneck => f.write_str("TESTING BOTTLENECK: Consider prioritizing QA"),
            Self::StaleItems { count } => {
                write!(f, "STALE ITEMS: {count} issues stuck >14 days")
            }
            Self::FlowInstability { variance_percent } => write!(
                f,
                "FLOW INSTABILITY: Actual WIP deviates {variance_percent:.0}% from predicted"
            ),
        }
    }
}

/// Figures the rules look at, at full precision.
#[derive(Debug, Clone)]
pub struct SignalInput<'a> {
    pub wip: &'a BTreeMap<String, i64>,
    /// Keyed by bare status name; see [`normalize_wip_limits`].
    pub wip_limits: &'a BTreeMap<String, i64>,
    pub arrival_rate: f64,
    pub departure_rate: f64,
    pub stale_count: usize,
    pub variance_percent: Option<f64>,
}

impl<'a> SignalInput<'a> {
    /// Column counts and limits with every other figure zeroed.
    #[must_use]
    pub const fn new(wip: &'a BTreeMap<String, i64>, wip_limits: &'a BTreeMap<String, i64>) -> Self {
        Self {
            wip,
            wip_limits,
            arrival_rate: 0.0,
            departure_rate: 0.0,
            stale_count: 0,
            variance_percent: None,
        }
    }
}

/// Accept limit keys written either as `review` or `status: review`.
#[must_use]
pub fn normalize_wip_limits(limits: &BTreeMap<String, i64>) -> BTreeMap<String, i64> {
    limits
        .iter()
        .map(|(key, limit)| {
            let status = match categorize(key) {
                (LabelCategory::Status, value) => value,
                (_, lower) => lower,
            };
            (FlowStatus::parse(&status).as_str().to_string(), *limit)
        })
        .collect()
}

/// Evaluate every rule.
#[must_use]
pub fn detect(input: &SignalInput<'_>) -> Vec<Signal> {
    let count = |status: &str| input.wip.get(status).copied().unwrap_or(0);
    let mut signals = Vec::new();

    // Canonical columns first, then custom ones by name.
    let canonical = FlowStatus::CANONICAL;
    let mut ordered: Vec<&str> = canonical.iter().map(FlowStatus::as_str).collect();
    ordered.extend(
        input
            .wip_limits
            .keys()
            .map(String::as_str)
            .filter(|k| FlowStatus::parse(k).board_rank() == FlowStatus::CANONICAL.len()),
    );
    for status in ordered {
        if let Some(&limit) = input.wip_limits.get(status) {
            let n = count(status);
            if n > limit {
                signals.push(Signal::WipLimit {
                    status: status.to_string(),
                    count: n,
                    limit,
                });
            }
        }
    }

    if input.arrival_rate > input.departure_rate * OVERLOAD_FACTOR
        && input.arrival_rate > OVERLOAD_MIN_ARRIVAL
    {
        signals.push(Signal::Overload {
            arrival: input.arrival_rate,
            departure: input.departure_rate,
        });
    }

    let (in_progress, review, testing) = (count("in-progress"), count("review"), count("testing"));
    if review > in_progress * COLUMN_RATIO && review > COLUMN_MIN_COUNT {
        signals.push(Signal::ReviewBottleneck);
    }
    if testing > review * COLUMN_RATIO && testing > COLUMN_MIN_COUNT {
        signals.push(Signal::TestingBottleneck);
    }

    if input.stale_count > 0 {
        signals.push(Signal::StaleItems {
            count: input.stale_count,
        });
    }

    if let Some(variance) = input.variance_percent {
        if variance.abs() > INSTABILITY_PERCENT {
            signals.push(Signal::FlowInstability {
                variance_percent: variance,
            });
        }
    }

    signals
}
