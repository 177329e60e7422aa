//! Database schema definitions and migration logic.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{KanbanError, Result};

/// Bumped whenever the DDL below changes shape.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// The complete SQL schema for the kanban database.
pub const SCHEMA_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS organizations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        full_name TEXT NOT NULL UNIQUE,
        last_sync_at TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (org_id, name),
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );

    -- Label cache per repository, compared against config before pushing
    CREATE TABLE IF NOT EXISTS labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        color TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT 'other',
        synced_at TEXT NOT NULL,
        UNIQUE (repo_id, name),
        FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS issues (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id INTEGER NOT NULL,
        number INTEGER NOT NULL,
        title TEXT NOT NULL,
        state TEXT NOT NULL,
        status TEXT,
        priority TEXT,
        issue_type TEXT,
        size TEXT,
        is_blocked INTEGER NOT NULL DEFAULT 0,
        assignee TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        closed_at TEXT,
        entered_ready_at TEXT,
        entered_in_progress_at TEXT,
        entered_review_at TEXT,
        entered_testing_at TEXT,
        entered_done_at TEXT,
        lead_time_hours REAL,
        cycle_time_hours REAL,
        blocked_time_hours REAL NOT NULL DEFAULT 0,
        synced_at TEXT NOT NULL,
        UNIQUE (repo_id, number),
        FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_issues_repo_state ON issues(repo_id, state);
    CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
    CREATE INDEX IF NOT EXISTS idx_issues_closed_at ON issues(closed_at);
    CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at);

    CREATE TABLE IF NOT EXISTS issue_labels (
        issue_id INTEGER NOT NULL,
        label TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS pull_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id INTEGER NOT NULL,
        number INTEGER NOT NULL,
        title TEXT NOT NULL,
        state TEXT NOT NULL,
        is_draft INTEGER NOT NULL DEFAULT 0,
        author TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        merged_at TEXT,
        closed_at TEXT,
        additions INTEGER NOT NULL DEFAULT 0,
        deletions INTEGER NOT NULL DEFAULT 0,
        changed_files INTEGER NOT NULL DEFAULT 0,
        merge_time_hours REAL,
        synced_at TEXT NOT NULL,
        UNIQUE (repo_id, number),
        FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS pr_issue_links (
        pr_id INTEGER NOT NULL,
        issue_id INTEGER NOT NULL,
        PRIMARY KEY (pr_id, issue_id),
        FOREIGN KEY (pr_id) REFERENCES pull_requests(id) ON DELETE CASCADE,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    -- Append-only status ledger
    CREATE TABLE IF NOT EXISTS status_transitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id INTEGER NOT NULL,
        from_status TEXT,
        to_status TEXT NOT NULL,
        transitioned_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_transitions_issue ON status_transitions(issue_id, transitioned_at);

    CREATE TABLE IF NOT EXISTS blocked_periods (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id INTEGER NOT NULL,
        blocked_at TEXT NOT NULL,
        unblocked_at TEXT,
        duration_hours REAL,
        reason TEXT NOT NULL DEFAULT 'label',
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_blocked_periods_issue ON blocked_periods(issue_id);

    CREATE TABLE IF NOT EXISTS cfd_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id INTEGER NOT NULL,
        snapshot_date TEXT NOT NULL,
        status TEXT NOT NULL,
        count INTEGER NOT NULL,
        UNIQUE (repo_id, snapshot_date, status),
        FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS sync_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id INTEGER,
        sync_type TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        status TEXT NOT NULL,
        items_synced INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        FOREIGN KEY (repo_id) REFERENCES repositories(id) ON DELETE SET NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sync_history_started ON sync_history(started_at);

    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

const VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)";

/// Highest schema version recorded in the database, 0 for a fresh file.
///
/// # Errors
///
/// Returns an error if the version table cannot be read.
pub fn stored_version(conn: &Connection) -> Result<i32> {
    conn.execute(VERSION_TABLE_SQL, [])?;
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`].
///
/// The DDL is idempotent (`IF NOT EXISTS`); it only runs when the stored
/// version is behind. A database written by a newer binary is refused.
///
/// # Errors
///
/// Returns [`KanbanError::SchemaMismatch`] when the stored version is newer,
/// or a database error if the SQL execution fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    let found = stored_version(conn)?;
    if found > CURRENT_SCHEMA_VERSION {
        return Err(KanbanError::SchemaMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found,
        });
    }

    if found < CURRENT_SCHEMA_VERSION {
        tracing::debug!(from = found, to = CURRENT_SCHEMA_VERSION, "Applying schema");
        conn.execute_batch(SCHEMA_SQL)?;
        run_migrations(conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![CURRENT_SCHEMA_VERSION, Utc::now().to_rfc3339()],
        )?;
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

/// Upgrade tables created by older schema versions.
fn run_migrations(conn: &Connection) -> Result<()> {
    // v1 databases predate the size classification column
    let has_size: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('issues') WHERE name='size'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !has_size {
        conn.execute("ALTER TABLE issues ADD COLUMN size TEXT", [])?;
    }

    Ok(())
}
