//! GitHub CLI (`gh`) adapter.
//!
//! Shells out to `gh` with `--json` output instead of calling the REST API
//! directly, so authentication is whatever `gh auth` already holds.

use std::io::ErrorKind;
use std::process::Command;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::{
    IssueTracker, RawIssue, RawPullRequest, TimelineEvent, TimelineEventKind, TrackerError,
    TrackerResult,
};
use crate::model::LabelSpec;

const REPO_LIST_LIMIT: &str = "500";
const ISSUE_FIELDS: &str = "number,title,state,createdAt,updatedAt,closedAt,labels,assignees";
const PR_FIELDS: &str =
    "number,title,state,isDraft,createdAt,updatedAt,mergedAt,closedAt,author,additions,deletions,changedFiles";

static CLOSING_REF: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s+#(\d+)").ok()
});

/// [`IssueTracker`] backed by the `gh` binary.
#[derive(Debug, Clone)]
pub struct GhCli {
    program: String,
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GhCli {
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("gh")
    }

    /// Use a different executable (a wrapper script, a pinned path).
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check whether `gh auth status` succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if `gh` cannot be spawned.
    pub fn check_auth(&self) -> TrackerResult<bool> {
        let output = Command::new(&self.program)
            .args(["auth", "status"])
            .output()
            .map_err(spawn_error)?;
        Ok(output.status.success())
    }

    fn run(&self, args: &[&str]) -> TrackerResult<Vec<u8>> {
        let command = format!(
            "{} {}",
            self.program,
            args.iter().take(2).copied().collect::<Vec<_>>().join(" ")
        );
        debug!(command = %command, "Running tracker command");
        trace!(?args, "Full argument list");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(spawn_error)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(command, stderr));
        }

        Ok(output.stdout)
    }

    fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> TrackerResult<T> {
        let stdout = self.run(args)?;
        serde_json::from_slice(&stdout).map_err(parse_error)
    }
}

fn spawn_error(err: std::io::Error) -> TrackerError {
    if err.kind() == ErrorKind::NotFound {
        TrackerError::NotInstalled
    } else {
        TrackerError::Io(err)
    }
}

fn parse_error(err: serde_json::Error) -> TrackerError {
    TrackerError::Parse {
        message: err.to_string(),
    }
}

/// Map a failed `gh` invocation to a typed error using its stderr text.
fn classify_failure(command: String, stderr: String) -> TrackerError {
    let lower = stderr.to_lowercase();
    if lower.contains("rate limit") || lower.contains("secondary rate") {
        TrackerError::RateLimited { message: stderr }
    } else if lower.contains("gh auth login")
        || lower.contains("not logged")
        || lower.contains("authentication required")
    {
        TrackerError::NotAuthenticated
    } else {
        TrackerError::CommandFailed { command, stderr }
    }
}

/// `gh` reports missing timestamps as `null` or as the zero time.
fn real_time(value: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    value.filter(|dt| dt.year() > 1)
}

/// Issue numbers referenced by "closes #N" style keywords in a PR body.
#[must_use]
pub fn parse_closing_references(body: &str) -> Vec<i64> {
    let Some(re) = CLOSING_REF.as_ref() else {
        return Vec::new();
    };
    let mut numbers: Vec<i64> = re
        .captures_iter(body)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .filter(|n| *n > 0)
        .collect();
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

#[derive(Deserialize)]
struct GhName {
    name: String,
}

#[derive(Deserialize)]
struct GhLogin {
    login: String,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
    #[serde(default)]
    color: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhIssue {
    number: i64,
    title: String,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: Vec<GhName>,
    #[serde(default)]
    assignees: Vec<GhLogin>,
}

impl From<GhIssue> for RawIssue {
    fn from(issue: GhIssue) -> Self {
        Self {
            number: issue.number,
            title: issue.title,
            state: issue.state,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            closed_at: real_time(issue.closed_at),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            assignee: issue.assignees.into_iter().next().map(|a| a.login),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: i64,
    title: String,
    state: String,
    #[serde(default)]
    is_draft: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: Option<GhLogin>,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
    #[serde(default)]
    changed_files: i64,
}

impl From<GhPullRequest> for RawPullRequest {
    fn from(pr: GhPullRequest) -> Self {
        Self {
            number: pr.number,
            title: pr.title,
            state: pr.state,
            is_draft: pr.is_draft,
            created_at: pr.created_at,
            updated_at: pr.updated_at,
            merged_at: real_time(pr.merged_at),
            closed_at: real_time(pr.closed_at),
            author: pr.author.map(|a| a.login),
            additions: pr.additions,
            deletions: pr.deletions,
            changed_files: pr.changed_files,
        }
    }
}

#[derive(Deserialize)]
struct GhTimelineEntry {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    label: Option<GhName>,
}

/// Parse `gh api --paginate` output, which concatenates one array per page.
fn parse_timeline_pages(bytes: &[u8]) -> TrackerResult<Vec<TimelineEvent>> {
    let mut events = Vec::new();
    for page in serde_json::Deserializer::from_slice(bytes).into_iter::<Vec<GhTimelineEntry>>() {
        for entry in page.map_err(parse_error)? {
            let kind = match entry.event.as_deref() {
                Some("labeled") => TimelineEventKind::Labeled,
                Some("unlabeled") => TimelineEventKind::Unlabeled,
                _ => continue,
            };
            let (Some(label), Some(at)) = (entry.label, entry.created_at) else {
                continue;
            };
            events.push(TimelineEvent {
                kind,
                label: label.name,
                at,
            });
        }
    }
    Ok(events)
}

#[derive(Deserialize)]
struct GraphQlLinked {
    data: GraphQlData,
}

#[derive(Deserialize)]
struct GraphQlData {
    repository: GraphQlRepository,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRepository {
    pull_request: GraphQlPullRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlPullRequest {
    closing_issues_references: GraphQlNodes,
}

#[derive(Deserialize)]
struct GraphQlNodes {
    nodes: Vec<GraphQlNumber>,
}

#[derive(Deserialize)]
struct GraphQlNumber {
    number: i64,
}

#[derive(Deserialize)]
struct GhBody {
    #[serde(default)]
    body: String,
}

impl IssueTracker for GhCli {
    fn list_repositories(&self, org: &str) -> TrackerResult<Vec<String>> {
        let repos: Vec<GhName> = self.run_json(&[
            "repo", "list", org, "--limit", REPO_LIST_LIMIT, "--json", "name",
        ])?;
        Ok(repos.into_iter().map(|r| r.name).collect())
    }

    fn list_labels(&self, org: &str, repo: &str) -> TrackerResult<Vec<LabelSpec>> {
        let full = format!("{org}/{repo}");
        let labels: Vec<GhLabel> = self.run_json(&[
            "label",
            "list",
            "--repo",
            &full,
            "--limit",
            REPO_LIST_LIMIT,
            "--json",
            "name,color,description",
        ])?;
        Ok(labels
            .into_iter()
            .map(|l| LabelSpec {
                name: l.name,
                color: l.color,
                description: l.description.unwrap_or_default(),
            })
            .collect())
    }

    fn create_label(&self, org: &str, repo: &str, label: &LabelSpec) -> TrackerResult<()> {
        let full = format!("{org}/{repo}");
        let mut args = vec![
            "label",
            "create",
            label.name.as_str(),
            "--repo",
            full.as_str(),
            "--color",
            label.color.as_str(),
        ];
        if !label.description.is_empty() {
            args.extend(["--description", label.description.as_str()]);
        }
        self.run(&args).map(|_| ())
    }

    fn update_label(&self, org: &str, repo: &str, label: &LabelSpec) -> TrackerResult<()> {
        let full = format!("{org}/{repo}");
        let mut args = vec![
            "label",
            "edit",
            label.name.as_str(),
            "--repo",
            full.as_str(),
            "--color",
            label.color.as_str(),
        ];
        if !label.description.is_empty() {
            args.extend(["--description", label.description.as_str()]);
        }
        self.run(&args).map(|_| ())
    }

    fn list_issues(&self, org: &str, repo: &str, limit: usize) -> TrackerResult<Vec<RawIssue>> {
        let full = format!("{org}/{repo}");
        let limit = limit.to_string();
        let issues: Vec<GhIssue> = self.run_json(&[
            "issue", "list", "--repo", &full, "--state", "all", "--json", ISSUE_FIELDS,
            "--limit", &limit,
        ])?;
        Ok(issues.into_iter().map(RawIssue::from).collect())
    }

    fn list_closed_issues(
        &self,
        org: &str,
        repo: &str,
        days: u32,
    ) -> TrackerResult<Vec<RawIssue>> {
        let full = format!("{org}/{repo}");
        let since = (Utc::now() - Duration::days(i64::from(days))).format("%Y-%m-%d");
        let search = format!("closed:>={since}");
        let issues: Vec<GhIssue> = self.run_json(&[
            "issue", "list", "--repo", &full, "--state", "closed", "--json", ISSUE_FIELDS,
            "--limit", REPO_LIST_LIMIT, "--search", &search,
        ])?;
        Ok(issues.into_iter().map(RawIssue::from).collect())
    }

    fn list_pull_requests(
        &self,
        org: &str,
        repo: &str,
        limit: usize,
    ) -> TrackerResult<Vec<RawPullRequest>> {
        let full = format!("{org}/{repo}");
        let limit = limit.to_string();
        let prs: Vec<GhPullRequest> = self.run_json(&[
            "pr", "list", "--repo", &full, "--state", "all", "--json", PR_FIELDS, "--limit",
            &limit,
        ])?;
        Ok(prs.into_iter().map(RawPullRequest::from).collect())
    }

    fn linked_issues(&self, org: &str, repo: &str, pr_number: i64) -> TrackerResult<Vec<i64>> {
        let query = format!(
            "query {{ repository(owner: \"{org}\", name: \"{repo}\") {{ pullRequest(number: {pr_number}) {{ closingIssuesReferences(first: 10) {{ nodes {{ number }} }} }} }} }}"
        );
        let query_arg = format!("query={query}");
        match self.run_json::<GraphQlLinked>(&["api", "graphql", "-f", &query_arg]) {
            Ok(linked) => Ok(linked
                .data
                .repository
                .pull_request
                .closing_issues_references
                .nodes
                .into_iter()
                .map(|n| n.number)
                .collect()),
            Err(err @ (TrackerError::RateLimited { .. } | TrackerError::NotAuthenticated)) => {
                Err(err)
            }
            Err(err) => {
                debug!(pr = pr_number, error = %err, "GraphQL lookup failed, parsing PR body");
                let full = format!("{org}/{repo}");
                let number = pr_number.to_string();
                let pr: GhBody =
                    self.run_json(&["pr", "view", &number, "--repo", &full, "--json", "body"])?;
                Ok(parse_closing_references(&pr.body))
            }
        }
    }

    fn timeline(
        &self,
        org: &str,
        repo: &str,
        issue_number: i64,
    ) -> TrackerResult<Vec<TimelineEvent>> {
        let path = format!("repos/{org}/{repo}/issues/{issue_number}/timeline");
        let stdout = self.run(&["api", &path, "--paginate"])?;
        parse_timeline_pages(&stdout)
    }
}
