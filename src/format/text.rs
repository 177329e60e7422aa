//! Plain text rendering for terminal output.
//!
//! Every renderer returns a `String`; commands decide where it goes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::NaiveDate;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::metrics::{KanbanMetrics, TimeStats};
use crate::model::{BoardColumn, BoardIssue, CfdSnapshot, Stats};
use crate::sync::{RepoAudit, SyncReport};

/// Blocked marker on board cards.
pub const BLOCKED_ICON: &str = "●";

/// Terminal width from `COLUMNS`, defaulting to 80.
#[must_use]
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.trim().parse::<usize>().ok())
        .filter(|w| *w > 0)
        .unwrap_or(80)
}

/// Truncate a title to fit within `max_len` visible columns.
///
/// Handles wide characters (emojis, CJK) using `unicode-width`.
#[must_use]
pub fn truncate_title(title: &str, max_len: usize) -> String {
    if UnicodeWidthStr::width(title) <= max_len {
        return title.to_string();
    }
    let (budget, ellipsis) = if max_len <= 3 {
        (max_len, "")
    } else {
        (max_len - 3, "...")
    };

    let mut width = 0;
    let mut out = String::new();
    for c in title.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw > budget {
            break;
        }
        width += cw;
        out.push(c);
    }
    out.push_str(ellipsis);
    out
}

fn days(value: f64) -> String {
    format!("{value:.1}d")
}

fn time_line(out: &mut String, label: &str, stats: &TimeStats) {
    if stats.is_empty() {
        let _ = writeln!(out, "  {label:<12} no samples");
        return;
    }
    let _ = writeln!(
        out,
        "  {label:<12} avg {}  median {}  p85 {}  (n={})",
        days(stats.average),
        days(stats.median),
        days(stats.p85),
        stats.count
    );
}

/// Metrics report.
#[must_use]
pub fn format_metrics(m: &KanbanMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Kanban metrics for {} (last {} days)", m.repo, m.period_days);
    let _ = writeln!(out);

    let _ = writeln!(out, "Flow times:");
    time_line(&mut out, "Lead time", &m.lead_time);
    time_line(&mut out, "Cycle time", &m.cycle_time);
    time_line(&mut out, "WIP age", &m.wip_age);
    match m.flow_efficiency_percent {
        Some(pct) => {
            let _ = writeln!(out, "  {:<12} {pct:.1}%", "Efficiency");
        }
        None => {
            let _ = writeln!(out, "  {:<12} n/a", "Efficiency");
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Throughput: {} done ({:.1}/day, {:.1}/week)",
        m.throughput.total, m.throughput.per_day, m.throughput.per_week
    );
    let _ = writeln!(
        out,
        "Arrival {:.1}/day, departure {:.1}/day, blocked {:.1}h",
        m.arrival_rate_per_day, m.departure_rate_per_day, m.blocked_time_hours
    );
    let variance = m
        .littles_law
        .variance_percent
        .map_or_else(|| "n/a".to_string(), |v| format!("{v:+.1}%"));
    let _ = writeln!(
        out,
        "Little's Law: predicted WIP {:.1}, actual {} ({variance})",
        m.littles_law.predicted_wip, m.littles_law.actual_wip
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "WIP (flow load {}):", m.flow_load);
    for (status, count) in &m.wip {
        let density = m.density_percent.get(status).copied().unwrap_or(0.0);
        let limit = m
            .wip_limits
            .get(status)
            .map_or_else(String::new, |l| format!(" / limit {l}"));
        let _ = writeln!(out, "  {status:<12} {count:>4}{limit}  ({density:.1}%)");
    }

    if !m.aging_issues.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Aging work:");
        for item in &m.aging_issues {
            let marker = if item.is_blocked { BLOCKED_ICON } else { " " };
            let reference = match &item.repo {
                Some(repo) => format!("{repo}#{}", item.number),
                None => format!("#{}", item.number),
            };
            let _ = writeln!(
                out,
                "  {marker} {reference:<7} {:>7}  {:<12} {}",
                days(item.age_days),
                item.status,
                truncate_title(&item.title, 48)
            );
        }
    }

    let _ = writeln!(out);
    if m.bottlenecks.is_empty() {
        let _ = writeln!(out, "No bottlenecks detected.");
    } else {
        let _ = writeln!(out, "Bottlenecks:");
        for signal in &m.bottlenecks {
            let _ = writeln!(out, "  - {signal}");
        }
    }
    out
}

fn card_line(issue: &BoardIssue, width: usize, show_repo: bool) -> String {
    let marker = if issue.is_blocked { BLOCKED_ICON } else { " " };
    let reference = if show_repo {
        format!("{}#{}", issue.repo, issue.number)
    } else {
        format!("#{}", issue.number)
    };
    let badge = issue
        .priority
        .as_deref()
        .map_or_else(String::new, |p| format!("[{p}] "));
    let age = days(issue.age_days);
    let prefix = format!("  {marker} {reference} {badge}");
    let used = UnicodeWidthStr::width(prefix.as_str()) + age.len() + 2;
    let title = truncate_title(&issue.title, width.saturating_sub(used));
    format!("{prefix}{title}  {age}")
}

/// Board grouped by status column.
#[must_use]
pub fn format_board(columns: &[BoardColumn], width: usize) -> String {
    if columns.is_empty() {
        return "Board is empty.\n".to_string();
    }
    let repos: BTreeSet<&str> = columns
        .iter()
        .flat_map(|c| c.issues.iter().map(|i| i.repo.as_str()))
        .collect();
    let show_repo = repos.len() > 1;

    let mut out = String::new();
    for column in columns {
        let _ = writeln!(out, "{} ({})", column.status.to_uppercase(), column.issues.len());
        for issue in &column.issues {
            let _ = writeln!(out, "{}", card_line(issue, width, show_repo));
        }
        let _ = writeln!(out);
    }
    out
}

/// CFD snapshots as a day by status table.
#[must_use]
pub fn format_cfd(snapshots: &[CfdSnapshot]) -> String {
    if snapshots.is_empty() {
        return "No snapshots in range.\n".to_string();
    }
    let mut statuses: Vec<&str> = Vec::new();
    let mut rows: BTreeMap<NaiveDate, BTreeMap<&str, i64>> = BTreeMap::new();
    for snap in snapshots {
        if !statuses.contains(&snap.status.as_str()) {
            statuses.push(&snap.status);
        }
        rows.entry(snap.snapshot_date)
            .or_default()
            .insert(&snap.status, snap.count);
    }

    let mut out = format!("{:<10}", "date");
    for status in &statuses {
        let _ = write!(out, " {status:>11}");
    }
    out.push('\n');
    for (day, counts) in &rows {
        let _ = write!(out, "{}", day.format("%Y-%m-%d"));
        for status in &statuses {
            let _ = write!(out, " {:>11}", counts.get(status).copied().unwrap_or(0));
        }
        out.push('\n');
    }
    out
}

/// Store diagnostics.
#[must_use]
pub fn format_stats(stats: &Stats, path: &str, size_bytes: u64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Database: {path} ({size_bytes} bytes, schema v{})", stats.schema_version);
    let _ = writeln!(out, "  Organizations:   {}", stats.organizations);
    let _ = writeln!(out, "  Repositories:    {}", stats.repositories);
    let _ = writeln!(
        out,
        "  Issues:          {} ({} open, {} closed)",
        stats.issues, stats.open_issues, stats.closed_issues
    );
    let _ = writeln!(out, "  Pull requests:   {}", stats.pull_requests);
    let _ = writeln!(out, "  Transitions:     {}", stats.transitions);
    let _ = writeln!(out, "  Blocked periods: {}", stats.blocked_periods);
    let _ = writeln!(out, "  CFD snapshots:   {}", stats.cfd_snapshots);
    let _ = writeln!(out, "  Sync records:    {}", stats.sync_records);
    match (&stats.last_sync_at, &stats.last_sync_org) {
        (Some(at), Some(org)) => {
            let _ = writeln!(out, "  Last sync:       {} ({org})", at.to_rfc3339());
        }
        (Some(at), None) => {
            let _ = writeln!(out, "  Last sync:       {}", at.to_rfc3339());
        }
        _ => {
            let _ = writeln!(out, "  Last sync:       never");
        }
    }
    out
}

/// One line per repository, then the error list.
#[must_use]
pub fn format_sync_report(report: &SyncReport) -> String {
    let mut out = String::new();
    for repo in &report.repos {
        let _ = write!(
            out,
            "{:<40} {:<9} {} issues, {} PRs, {} labels changed",
            repo.repo, repo.state, repo.issues, repo.prs, repo.labels_changed
        );
        if repo.skipped > 0 {
            let _ = write!(out, ", {} skipped", repo.skipped);
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "Synced {} issues across {} repositories",
        report.total_issues,
        report.repos.len()
    );
    if !report.errors.is_empty() {
        let _ = writeln!(out, "Errors:");
        for err in &report.errors {
            let _ = writeln!(out, "  - {err}");
        }
    }
    out
}

/// Label drift per repository.
#[must_use]
pub fn format_audit(audits: &[RepoAudit]) -> String {
    let mut out = String::new();
    for repo in audits {
        let _ = writeln!(out, "{}:", repo.repo);
        let audit = &repo.audit;
        if audit.is_clean() {
            let _ = writeln!(out, "  All labels match config");
            continue;
        }
        let sections = [
            ("Missing labels:", '-', &audit.missing),
            ("Modified labels (color/description differs):", '~', &audit.modified),
            ("Extra labels (not in config):", '+', &audit.extra),
        ];
        for (heading, mark, names) in sections {
            if names.is_empty() {
                continue;
            }
            let _ = writeln!(out, "  {heading}");
            for name in names {
                let _ = writeln!(out, "    {mark} {name}");
            }
        }
    }
    if audits.is_empty() {
        out.push_str("No repositories audited.\n");
    }
    out
}
