//! Persistence: entity store, transition ledger and snapshot store.
//!
//! Everything lives in one versioned `SQLite` file accessed through a single
//! [`SqliteStorage`] connection.

pub mod ledger;
pub mod schema;
mod snapshots;
pub mod sqlite;

pub use sqlite::{LAST_SYNC_ORG_KEY, MutationContext, SqliteStorage, UpsertOutcome, labels_differ};
