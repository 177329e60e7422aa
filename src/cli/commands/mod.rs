//! Command implementations.

pub mod audit;
pub mod board;
pub mod cfd;
pub mod completions;
pub mod config;
pub mod db;
pub mod metrics;
pub mod sync;
pub mod version;

use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::model::Repository;
use crate::storage::{LAST_SYNC_ORG_KEY, SqliteStorage};

/// Open (creating if needed) the configured database.
pub(crate) fn open_storage(config: &Config) -> Result<SqliteStorage> {
    let path = config.database_path();
    debug!(path = %path.display(), "Opening database");
    SqliteStorage::open(&path)
}

/// Open the configured database, failing if it does not exist yet.
pub(crate) fn open_existing_storage(config: &Config) -> Result<SqliteStorage> {
    let path = config.database_path();
    debug!(path = %path.display(), "Opening existing database");
    SqliteStorage::open_existing(&path)
}

/// Turn `name` or `org/name` into a stored repository.
///
/// A bare name is qualified with the configured organization, falling back
/// to the organization of the last sync.
pub(crate) fn resolve_repository(
    storage: &SqliteStorage,
    config: &Config,
    name: &str,
) -> Result<Repository> {
    if name.contains('/') {
        return storage.require_repository(name);
    }
    let org = match config.organization.clone() {
        Some(org) => org,
        None => storage
            .get_metadata(LAST_SYNC_ORG_KEY)?
            .ok_or(crate::error::KanbanError::NoOrganization)?,
    };
    storage.require_repository(&format!("{org}/{name}"))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
