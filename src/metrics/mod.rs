//! Flow metrics for one repository, or several pooled, over a trailing window.
//!
//! [`compute`] is a pure function of a [`MetricsInput`]; [`collect`] and
//! [`collect_all`] gather that input from the store. Figures stay at full precision until the final
//! [`KanbanMetrics`] is assembled, where each reported scalar is rounded once.
//! An empty window is not an error: every figure is zero and lists are empty.

pub mod bottleneck;
pub mod stats;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::{FlowStatus, Issue, Repository, hours_between};
use crate::storage::SqliteStorage;
use crate::util::time::window_start;

pub use bottleneck::{Signal, SignalInput, normalize_wip_limits};
pub use stats::{RateStats, TimeStats, round1};

/// Aging issues listed in a report.
pub const AGING_LIST_LIMIT: usize = 10;

const HOURS_PER_DAY: f64 = 24.0;

/// An in-flight issue and how long it has been idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingIssue {
    /// Set when several repositories are pooled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub number: i64,
    pub title: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub age_days: f64,
    pub blocked_hours: f64,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LittlesLaw {
    pub predicted_wip: f64,
    pub actual_wip: i64,
    /// Percent; absent when the predicted WIP is zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance_percent: Option<f64>,
}

/// Everything reported for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KanbanMetrics {
    pub repo: String,
    pub generated_at: DateTime<Utc>,
    pub period_days: u32,

    pub lead_time: TimeStats,
    pub cycle_time: TimeStats,
    pub throughput: RateStats,
    /// Percent; absent without cycle-time samples.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_efficiency_percent: Option<f64>,

    pub wip: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub wip_limits: BTreeMap<String, i64>,
    pub wip_age: TimeStats,
    pub littles_law: LittlesLaw,

    pub arrival_rate_per_day: f64,
    pub departure_rate_per_day: f64,
    pub blocked_time_hours: f64,

    pub flow_load: i64,
    pub density_percent: BTreeMap<String, f64>,

    pub aging_issues: Vec<AgingIssue>,
    pub bottlenecks: Vec<String>,
}

/// Raw material for [`compute`].
#[derive(Debug, Clone, Default)]
pub struct MetricsInput {
    pub repo: String,
    pub window_days: u32,
    pub now: DateTime<Utc>,
    /// Live per-status counts, `none` for unclassified.
    pub wip: BTreeMap<String, i64>,
    pub wip_limits: BTreeMap<String, i64>,
    pub open_issues: Vec<Issue>,
    /// Issues closed inside the window.
    pub closed_issues: Vec<Issue>,
    /// Issues created inside the window.
    pub created_count: i64,
    /// Only list aging issues held by this assignee (case-insensitive).
    pub assignee: Option<String>,
    /// Repository names by id, for labelling pooled aging issues.
    pub repo_names: BTreeMap<i64, String>,
}

/// Knobs shared by [`collect`] and [`collect_all`].
#[derive(Debug, Clone, Default)]
pub struct MetricsOptions {
    pub window_days: u32,
    pub wip_limits: BTreeMap<String, i64>,
    pub assignee: Option<String>,
}

fn assigned_to(issue: &AgingIssue, wanted: Option<&str>) -> bool {
    wanted.is_none_or(|w| {
        issue
            .assignee
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(w))
    })
}

fn days(hours: f64) -> f64 {
    hours / HOURS_PER_DAY
}

/// Active WIP: every column except backlog, done and unclassified.
fn active_wip(wip: &BTreeMap<String, i64>) -> i64 {
    wip.iter()
        .filter(|(status, _)| {
            status.as_str() != "none" && FlowStatus::parse(status).is_active()
        })
        .map(|(_, count)| count)
        .sum()
}

/// Compute the report for one repository.
#[must_use]
pub fn compute(input: &MetricsInput) -> KanbanMetrics {
    let period = input.window_days.max(1);

    let lead_days: Vec<f64> = input
        .closed_issues
        .iter()
        .filter_map(|i| i.lead_time_hours.map(days))
        .collect();
    let lead_time = TimeStats::from_values(&lead_days);

    // Flow efficiency pairs each cycle time with the same issue's lead time.
    let (cycle_days, paired_lead_days): (Vec<f64>, Vec<f64>) = input
        .closed_issues
        .iter()
        .filter_map(|i| Some((days(i.cycle_time_hours?), days(i.lead_time_hours?))))
        .unzip();
    let cycle_time = TimeStats::from_values(&cycle_days);
    let paired_lead = TimeStats::from_values(&paired_lead_days);
    let flow_efficiency = (!cycle_time.is_empty() && paired_lead.average > 0.0)
        .then(|| cycle_time.average / paired_lead.average * 100.0);

    let throughput = RateStats::over_days(input.closed_issues.len(), period);
    let departure_rate = throughput.per_day;
    let arrival_rate = input.created_count as f64 / f64::from(period);

    let mut aging: Vec<AgingIssue> = input
        .open_issues
        .iter()
        .filter_map(|issue| {
            let status = issue.status.as_ref()?;
            if !status.is_active() {
                return None;
            }
            Some(AgingIssue {
                repo: input.repo_names.get(&issue.repo_id).cloned(),
                number: issue.number,
                title: issue.title.clone(),
                status: status.as_str().to_string(),
                assignee: issue.assignee.clone(),
                age_days: days(hours_between(issue.updated_at, input.now).max(0.0)),
                blocked_hours: issue.blocked_time_hours,
                is_blocked: issue.is_blocked,
            })
        })
        .collect();
    aging.sort_by(|a, b| {
        b.age_days
            .total_cmp(&a.age_days)
            .then_with(|| a.repo.cmp(&b.repo))
            .then_with(|| a.number.cmp(&b.number))
    });
    let ages: Vec<f64> = aging.iter().map(|a| a.age_days).collect();
    let wip_age = TimeStats::from_values(&ages);
    let stale_count = ages
        .iter()
        .filter(|&&age| age > bottleneck::STALE_AFTER_DAYS)
        .count();

    let actual_wip = active_wip(&input.wip);
    let predicted_wip = throughput.per_day * lead_time.average;
    let variance_percent = (predicted_wip > 0.0)
        .then(|| (actual_wip as f64 - predicted_wip) / predicted_wip * 100.0);

    let flow_load: i64 = input.wip.values().sum();
    let density = input
        .wip
        .iter()
        .filter(|_| flow_load > 0)
        .map(|(status, &count)| {
            (
                status.clone(),
                round1(count as f64 / flow_load as f64 * 100.0),
            )
        })
        .collect();

    let wip_limits = normalize_wip_limits(&input.wip_limits);
    let signals = bottleneck::detect(&SignalInput {
        wip: &input.wip,
        wip_limits: &wip_limits,
        arrival_rate,
        departure_rate,
        stale_count,
        variance_percent,
    });

    let blocked_time_hours = input
        .open_issues
        .iter()
        .chain(&input.closed_issues)
        .map(|i| i.blocked_time_hours)
        .sum::<f64>();

    // The filter narrows the list only; every other figure stays team-wide.
    aging.retain(|issue| assigned_to(issue, input.assignee.as_deref()));
    for issue in &mut aging {
        issue.age_days = round1(issue.age_days);
    }
    aging.truncate(AGING_LIST_LIMIT);

    KanbanMetrics {
        repo: input.repo.clone(),
        generated_at: input.now,
        period_days: period,
        lead_time: lead_time.rounded(),
        cycle_time: cycle_time.rounded(),
        throughput: RateStats {
            total: throughput.total,
            per_day: round1(throughput.per_day),
            per_week: round1(throughput.per_week),
        },
        flow_efficiency_percent: flow_efficiency.map(round1),
        wip: input.wip.clone(),
        wip_limits,
        wip_age: wip_age.rounded(),
        littles_law: LittlesLaw {
            predicted_wip: round1(predicted_wip),
            actual_wip,
            variance_percent: variance_percent.map(round1),
        },
        arrival_rate_per_day: round1(arrival_rate),
        departure_rate_per_day: round1(departure_rate),
        blocked_time_hours: round1(blocked_time_hours),
        flow_load,
        density_percent: density,
        aging_issues: aging,
        bottlenecks: signals.iter().map(ToString::to_string).collect(),
    }
}

/// Gather the input for `repo` from the store and compute its report.
///
/// # Errors
///
/// Returns an error if any store query fails.
pub fn collect(
    storage: &SqliteStorage,
    repo: &Repository,
    options: &MetricsOptions,
    now: DateTime<Utc>,
) -> Result<KanbanMetrics> {
    let input = gather(storage, repo, options, now)?;
    debug!(
        repo = %repo.full_name,
        closed = input.closed_issues.len(),
        open = input.open_issues.len(),
        "Computing metrics"
    );
    Ok(compute(&input))
}

/// Pool every repository in `repos` into one report named `name`.
///
/// WIP counts and arrivals are summed; issue lists are concatenated, so
/// each distribution is computed over the pooled samples rather than
/// averaged across repositories.
///
/// # Errors
///
/// Returns an error if any store query fails.
pub fn collect_all(
    storage: &SqliteStorage,
    repos: &[Repository],
    name: &str,
    options: &MetricsOptions,
    now: DateTime<Utc>,
) -> Result<KanbanMetrics> {
    let mut pooled = MetricsInput {
        repo: name.to_string(),
        window_days: options.window_days,
        now,
        wip_limits: options.wip_limits.clone(),
        assignee: options.assignee.clone(),
        ..MetricsInput::default()
    };
    for repo in repos {
        let input = gather(storage, repo, options, now)?;
        for (status, count) in input.wip {
            *pooled.wip.entry(status).or_insert(0) += count;
        }
        pooled.open_issues.extend(input.open_issues);
        pooled.closed_issues.extend(input.closed_issues);
        pooled.created_count += input.created_count;
        pooled.repo_names.insert(repo.id, repo.full_name.clone());
    }
    debug!(
        name,
        repos = repos.len(),
        closed = pooled.closed_issues.len(),
        open = pooled.open_issues.len(),
        "Computing pooled metrics"
    );
    Ok(compute(&pooled))
}

fn gather(
    storage: &SqliteStorage,
    repo: &Repository,
    options: &MetricsOptions,
    now: DateTime<Utc>,
) -> Result<MetricsInput> {
    let since = window_start(now, options.window_days.max(1));
    Ok(MetricsInput {
        repo: repo.full_name.clone(),
        window_days: options.window_days,
        now,
        wip: storage.status_counts(repo.id)?,
        wip_limits: options.wip_limits.clone(),
        open_issues: storage.open_issues(repo.id)?,
        closed_issues: storage.closed_between(repo.id, since, now)?,
        created_count: storage.created_between(repo.id, since, now)?,
        assignee: options.assignee.clone(),
        repo_names: BTreeMap::new(),
    })
}
