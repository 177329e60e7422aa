//! Per-day status counts for cumulative flow.
//!
//! One row per (repository, day, status). Saving a day again replaces the
//! earlier rows for that day, so re-runs never accumulate duplicates.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;
use tracing::debug;

use super::sqlite::SqliteStorage;
use crate::error::Result;
use crate::model::CfdSnapshot;
use crate::util::time::{format_day, parse_day};

impl SqliteStorage {
    /// Write the counts for `day`, replacing whatever that day held before.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is written then.
    pub fn save_cfd_snapshot(
        &mut self,
        repo_id: i64,
        day: NaiveDate,
        counts: &BTreeMap<String, i64>,
    ) -> Result<usize> {
        let day_str = format_day(day);
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM cfd_snapshots WHERE repo_id = ?1 AND snapshot_date = ?2",
            params![repo_id, day_str],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO cfd_snapshots (repo_id, snapshot_date, status, count)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (status, count) in counts {
                stmt.execute(params![repo_id, day_str, status, count])?;
            }
        }
        tx.commit()?;
        debug!(repo_id, day = %day_str, statuses = counts.len(), "Saved CFD snapshot");
        Ok(counts.len())
    }

    /// True when no snapshot exists yet for the UTC day containing `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn should_snapshot_today(&self, repo_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let exists = self
            .conn
            .prepare("SELECT 1 FROM cfd_snapshots WHERE repo_id = ?1 AND snapshot_date = ?2")?
            .exists(params![repo_id, format_day(now.date_naive())])?;
        Ok(!exists)
    }

    /// Snapshot the repository's live status counts for today.
    ///
    /// # Errors
    ///
    /// Returns an error if counting or saving fails.
    pub fn take_snapshot(&mut self, repo_id: i64, now: DateTime<Utc>) -> Result<usize> {
        let counts = self.status_counts(repo_id)?;
        self.save_cfd_snapshot(repo_id, now.date_naive(), &counts)
    }

    /// Snapshot rows in `[from, to]`, ordered by day then status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored day is malformed.
    pub fn cfd_range(&self, repo_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<CfdSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_date, status, count FROM cfd_snapshots
             WHERE repo_id = ?1 AND snapshot_date >= ?2 AND snapshot_date <= ?3
             ORDER BY snapshot_date, status",
        )?;
        let rows = stmt
            .query_map(params![repo_id, format_day(from), format_day(to)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(day, status, count)| {
                Ok(CfdSnapshot {
                    repo_id,
                    snapshot_date: parse_day(&day, "snapshot_date")?,
                    status,
                    count,
                })
            })
            .collect()
    }
}
