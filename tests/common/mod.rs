#![allow(dead_code)]

pub mod cli;
pub mod fake_tracker;

pub use fake_tracker::{Calls, FakeTracker};

use chrono::{DateTime, TimeZone, Utc};
use kanban_rust::model::LabelSpec;
use kanban_rust::tracker::RawIssue;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("kanban_rust=debug")
            .with_test_writer()
            .try_init();
    });
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, day, hour, 0, 0).unwrap()
}

pub fn raw_issue(number: i64, state: &str, labels: &[&str]) -> RawIssue {
    RawIssue {
        number,
        title: format!("Issue {number}"),
        state: state.to_string(),
        created_at: at(1, 9),
        updated_at: at(2, 9),
        closed_at: (state == "CLOSED").then(|| at(3, 9)),
        labels: labels.iter().map(|l| (*l).to_string()).collect(),
        assignee: None,
    }
}

pub fn desired_labels() -> Vec<LabelSpec> {
    vec![
        LabelSpec::new("status: ready", "0e8a16", "Ready to start"),
        LabelSpec::new("status: in-progress", "fbca04", "Being worked on"),
        LabelSpec::new("blocked", "d93f0b", ""),
    ]
}
