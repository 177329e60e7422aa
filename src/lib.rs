//! `kanban_rust` - a local `SQLite` mirror of GitHub issues with Kanban flow
//! metrics.
//!
//! Issues are pulled from an [`tracker::IssueTracker`], classified by their
//! labels, and reconciled into a store that keeps status transitions,
//! blocked periods and daily CFD snapshots. [`metrics`] turns that history
//! into lead/cycle time, throughput, WIP and bottleneck signals.

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod storage;
pub mod sync;
pub mod tracker;
pub mod util;

pub use error::{ErrorCode, KanbanError, Result, StructuredError};
