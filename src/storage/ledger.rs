//! Status transition ledger.
//!
//! Append-only: rows are inserted alongside the issue write that observed
//! the change and are never updated or deleted. Metrics read the derived
//! `entered_*_at` fields on issues; this table is the audit trail.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::error::Result;
use crate::model::StatusTransition;
use crate::util::time::{format_timestamp, parse_timestamp};

use super::sqlite::timestamp_column;

/// Append a transition within the caller's transaction.
///
/// Per issue, `transitioned_at` never goes backwards: an `at` earlier than
/// the latest recorded transition is clamped to that transition's time.
///
/// # Errors
///
/// Returns an error if the database insert fails.
pub fn record_transition(
    tx: &Transaction<'_>,
    issue_id: i64,
    from_status: Option<&str>,
    to_status: &str,
    at: DateTime<Utc>,
) -> Result<i64> {
    let latest: Option<String> = tx
        .query_row(
            "SELECT MAX(transitioned_at) FROM status_transitions WHERE issue_id = ?1",
            [issue_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    let at = match latest.as_deref().and_then(parse_timestamp) {
        Some(last) if last > at => last,
        _ => at,
    };

    tx.execute(
        r"
        INSERT INTO status_transitions (issue_id, from_status, to_status, transitioned_at)
        VALUES (?1, ?2, ?3, ?4)
        ",
        params![issue_id, from_status, to_status, format_timestamp(at)],
    )?;

    Ok(tx.last_insert_rowid())
}

/// All transitions for an issue, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn transitions_for(conn: &Connection, issue_id: i64) -> Result<Vec<StatusTransition>> {
    let mut stmt = conn.prepare(
        r"
        SELECT id, issue_id, from_status, to_status, transitioned_at
        FROM status_transitions
        WHERE issue_id = ?1
        ORDER BY transitioned_at ASC, id ASC
        ",
    )?;

    let transitions = stmt
        .query_map([issue_id], |row| {
            Ok(StatusTransition {
                id: row.get(0)?,
                issue_id: row.get(1)?,
                from_status: row.get(2)?,
                to_status: row.get(3)?,
                transitioned_at: timestamp_column(row, 4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(transitions)
}

/// The status an issue most recently moved into, if it ever had one.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn last_status(conn: &Connection, issue_id: i64) -> Result<Option<String>> {
    let status = conn
        .query_row(
            r"
            SELECT to_status FROM status_transitions
            WHERE issue_id = ?1
            ORDER BY transitioned_at DESC, id DESC
            LIMIT 1
            ",
            [issue_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status)
}

/// Total number of ledger rows.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_transitions(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM status_transitions", [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_schema;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO organizations (name, created_at) VALUES ('acme', '2025-01-01T00:00:00.000Z');
             INSERT INTO repositories (org_id, name, full_name, created_at)
                 VALUES (1, 'api', 'acme/api', '2025-01-01T00:00:00.000Z');
             INSERT INTO issues (repo_id, number, title, state, created_at, updated_at, synced_at)
                 VALUES (1, 1, 'One', 'open', '2025-01-01T00:00:00.000Z',
                         '2025-01-01T00:00:00.000Z', '2025-01-01T00:00:00.000Z');",
        )
        .unwrap();
        (conn, 1)
    }

    #[test]
    fn test_record_and_read_back_in_order() {
        let (mut conn, issue_id) = setup();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        let tx = conn.transaction().unwrap();
        record_transition(&tx, issue_id, None, "ready", t0).unwrap();
        record_transition(&tx, issue_id, Some("ready"), "in-progress", t0 + Duration::hours(4))
            .unwrap();
        tx.commit().unwrap();

        let rows = transitions_for(&conn, issue_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].from_status, None);
        assert_eq!(rows[1].from_status.as_deref(), Some("ready"));
        assert_eq!(rows[1].to_status, "in-progress");
        assert_eq!(count_transitions(&conn).unwrap(), 2);
    }

    #[test]
    fn test_last_status_follows_latest_row() {
        let (mut conn, issue_id) = setup();
        assert_eq!(last_status(&conn, issue_id).unwrap(), None);

        let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let tx = conn.transaction().unwrap();
        record_transition(&tx, issue_id, None, "ready", t0).unwrap();
        record_transition(&tx, issue_id, Some("ready"), "review", t0).unwrap();
        tx.commit().unwrap();

        // Same timestamp: the later row wins.
        assert_eq!(last_status(&conn, issue_id).unwrap().as_deref(), Some("review"));
    }

    #[test]
    fn test_out_of_order_time_is_clamped() {
        let (mut conn, issue_id) = setup();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();

        let tx = conn.transaction().unwrap();
        record_transition(&tx, issue_id, None, "review", t0).unwrap();
        record_transition(&tx, issue_id, Some("review"), "done", t0 - Duration::days(2)).unwrap();
        tx.commit().unwrap();

        let rows = transitions_for(&conn, issue_id).unwrap();
        assert_eq!(rows[1].transitioned_at, t0);
        assert!(rows[0].transitioned_at <= rows[1].transitioned_at);
    }
}
