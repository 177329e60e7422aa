//! In-process [`IssueTracker`] with scripted responses and call counters.

use kanban_rust::model::LabelSpec;
use kanban_rust::tracker::{
    IssueTracker, RawIssue, RawPullRequest, TimelineEvent, TrackerError, TrackerResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// How long `list_issues` holds its slot, so concurrent workers overlap.
const FETCH_DELAY: Duration = Duration::from_millis(20);

#[derive(Default, Debug)]
pub struct Calls {
    pub list_repositories: AtomicUsize,
    pub list_labels: AtomicUsize,
    pub create_label: AtomicUsize,
    pub update_label: AtomicUsize,
    pub list_issues: AtomicUsize,
    pub list_closed_issues: AtomicUsize,
    pub list_pull_requests: AtomicUsize,
    pub linked_issues: AtomicUsize,
    pub timeline: AtomicUsize,
    /// `list_issues` calls running right now, and the most ever seen at once.
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        [
            &self.list_repositories,
            &self.list_labels,
            &self.create_label,
            &self.update_label,
            &self.list_issues,
            &self.list_closed_issues,
            &self.list_pull_requests,
            &self.linked_issues,
            &self.timeline,
        ]
        .iter()
        .map(|c| Self::get(c))
        .sum()
    }

    pub fn label_mutations(&self) -> usize {
        Self::get(&self.create_label) + Self::get(&self.update_label)
    }
}

#[derive(Default)]
struct State {
    repos: Vec<String>,
    labels: HashMap<String, Vec<LabelSpec>>,
    issues: HashMap<String, Vec<RawIssue>>,
    closed: HashMap<String, Vec<RawIssue>>,
    prs: HashMap<String, Vec<RawPullRequest>>,
    links: HashMap<(String, i64), Vec<i64>>,
    timelines: HashMap<(String, i64), Vec<TimelineEvent>>,
    failing_issues: HashSet<String>,
    failing_labels: HashSet<String>,
}

#[derive(Default)]
pub struct FakeTracker {
    state: Mutex<State>,
    pub calls: Calls,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repos(self, repos: &[&str]) -> Self {
        self.state.lock().unwrap().repos = repos.iter().map(|r| (*r).to_string()).collect();
        self
    }

    pub fn set_issues(&self, repo: &str, issues: Vec<RawIssue>) {
        self.state
            .lock()
            .unwrap()
            .issues
            .insert(repo.to_string(), issues);
    }

    pub fn set_closed(&self, repo: &str, issues: Vec<RawIssue>) {
        self.state
            .lock()
            .unwrap()
            .closed
            .insert(repo.to_string(), issues);
    }

    pub fn set_prs(&self, repo: &str, prs: Vec<RawPullRequest>) {
        self.state.lock().unwrap().prs.insert(repo.to_string(), prs);
    }

    pub fn link(&self, repo: &str, pr: i64, issues: &[i64]) {
        self.state
            .lock()
            .unwrap()
            .links
            .insert((repo.to_string(), pr), issues.to_vec());
    }

    pub fn set_timeline(&self, repo: &str, issue: i64, events: Vec<TimelineEvent>) {
        self.state
            .lock()
            .unwrap()
            .timelines
            .insert((repo.to_string(), issue), events);
    }

    pub fn fail_issues_for(&self, repo: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_issues
            .insert(repo.to_string());
    }

    pub fn fail_labels_for(&self, repo: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_labels
            .insert(repo.to_string());
    }

    pub fn remote_labels(&self, repo: &str) -> Vec<LabelSpec> {
        self.state
            .lock()
            .unwrap()
            .labels
            .get(repo)
            .cloned()
            .unwrap_or_default()
    }
}

impl IssueTracker for FakeTracker {
    fn list_repositories(&self, _org: &str) -> TrackerResult<Vec<String>> {
        bump(&self.calls.list_repositories);
        Ok(self.state.lock().unwrap().repos.clone())
    }

    fn list_labels(&self, _org: &str, repo: &str) -> TrackerResult<Vec<LabelSpec>> {
        bump(&self.calls.list_labels);
        let state = self.state.lock().unwrap();
        if state.failing_labels.contains(repo) {
            return Err(TrackerError::CommandFailed {
                command: "gh label list".to_string(),
                stderr: "HTTP 403".to_string(),
            });
        }
        Ok(state.labels.get(repo).cloned().unwrap_or_default())
    }

    fn create_label(&self, _org: &str, repo: &str, label: &LabelSpec) -> TrackerResult<()> {
        bump(&self.calls.create_label);
        self.state
            .lock()
            .unwrap()
            .labels
            .entry(repo.to_string())
            .or_default()
            .push(label.clone());
        Ok(())
    }

    fn update_label(&self, _org: &str, repo: &str, label: &LabelSpec) -> TrackerResult<()> {
        bump(&self.calls.update_label);
        let mut state = self.state.lock().unwrap();
        let labels = state.labels.entry(repo.to_string()).or_default();
        for existing in labels.iter_mut() {
            if existing.name.eq_ignore_ascii_case(&label.name) {
                *existing = label.clone();
            }
        }
        Ok(())
    }

    fn list_issues(&self, _org: &str, repo: &str, limit: usize) -> TrackerResult<Vec<RawIssue>> {
        bump(&self.calls.list_issues);
        let running = self.calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.max_in_flight.fetch_max(running, Ordering::SeqCst);
        thread::sleep(FETCH_DELAY);
        self.calls.in_flight.fetch_sub(1, Ordering::SeqCst);

        let state = self.state.lock().unwrap();
        if state.failing_issues.contains(repo) {
            return Err(TrackerError::RateLimited {
                message: "API rate limit exceeded".to_string(),
            });
        }
        let mut issues = state.issues.get(repo).cloned().unwrap_or_default();
        issues.truncate(limit);
        Ok(issues)
    }

    fn list_closed_issues(&self, _org: &str, repo: &str, _days: u32) -> TrackerResult<Vec<RawIssue>> {
        bump(&self.calls.list_closed_issues);
        Ok(self
            .state
            .lock()
            .unwrap()
            .closed
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    fn list_pull_requests(
        &self,
        _org: &str,
        repo: &str,
        limit: usize,
    ) -> TrackerResult<Vec<RawPullRequest>> {
        bump(&self.calls.list_pull_requests);
        let mut prs = self
            .state
            .lock()
            .unwrap()
            .prs
            .get(repo)
            .cloned()
            .unwrap_or_default();
        prs.truncate(limit);
        Ok(prs)
    }

    fn linked_issues(&self, _org: &str, repo: &str, pr_number: i64) -> TrackerResult<Vec<i64>> {
        bump(&self.calls.linked_issues);
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .get(&(repo.to_string(), pr_number))
            .cloned()
            .unwrap_or_default())
    }

    fn timeline(
        &self,
        _org: &str,
        repo: &str,
        issue_number: i64,
    ) -> TrackerResult<Vec<TimelineEvent>> {
        bump(&self.calls.timeline);
        Ok(self
            .state
            .lock()
            .unwrap()
            .timelines
            .get(&(repo.to_string(), issue_number))
            .cloned()
            .unwrap_or_default())
    }
}
