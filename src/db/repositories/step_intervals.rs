use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, from_millis, to_i64, to_u64},
    models::{IntervalSource, ModeId, StepInterval},
};

const INTERVAL_COLUMNS: &str = "id, start_ms, end_ms, step_count, walking_mode_id";

fn row_to_interval(row: &Row) -> Result<StepInterval, rusqlite::Error> {
    let start_ms: i64 = row.get("start_ms")?;
    let end_ms: i64 = row.get("end_ms")?;
    let step_count: i64 = row.get("step_count")?;
    let walking_mode_id: Option<i64> = row.get("walking_mode_id")?;

    Ok(StepInterval {
        id: row.get("id")?,
        start_time: from_millis(start_ms, "start_ms").map_err(conversion_error)?,
        end_time: from_millis(end_ms, "end_ms").map_err(conversion_error)?,
        step_count: to_u64(step_count, "step_count").map_err(conversion_error)?,
        walking_mode: walking_mode_id.map(ModeId),
        source: IntervalSource::Persisted,
    })
}

/// Insert on an existing connection; shared with the backup restore path.
pub(crate) fn insert_interval_row(conn: &Connection, interval: &StepInterval) -> Result<i64> {
    conn.execute(
        "INSERT INTO step_intervals (start_ms, end_ms, step_count, walking_mode_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            interval.start_time.timestamp_millis(),
            interval.end_time.timestamp_millis(),
            to_i64(interval.step_count)?,
            interval.walking_mode.map(|mode| mode.0),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("failed to insert step interval")?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Persist a flushed interval and return its row id.
    pub async fn insert_step_interval(&self, interval: &StepInterval) -> Result<i64> {
        let record = interval.clone();
        self.execute(move |conn| insert_interval_row(conn, &record))
            .await
    }

    /// Intervals touching the closed range `[start, end]`, ordered by start.
    ///
    /// This is a superset of what a window owns; the reconciler decides
    /// attribution.
    pub async fn query_step_intervals(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StepInterval>> {
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS}
                 FROM step_intervals
                 WHERE end_ms > ?1 AND start_ms <= ?2
                 ORDER BY start_ms ASC, end_ms ASC, id ASC"
            ))?;

            let intervals_iter =
                stmt.query_map(params![start_ms, end_ms], |row| row_to_interval(row))?;

            let mut intervals = Vec::new();
            for interval_result in intervals_iter {
                intervals.push(interval_result?);
            }

            Ok(intervals)
        })
        .await
    }

    pub async fn list_step_intervals(&self) -> Result<Vec<StepInterval>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM step_intervals ORDER BY start_ms ASC, id ASC"
            ))?;

            let intervals_iter = stmt.query_map([], |row| row_to_interval(row))?;

            let mut intervals = Vec::new();
            for interval_result in intervals_iter {
                intervals.push(interval_result?);
            }

            Ok(intervals)
        })
        .await
    }

    pub async fn first_step_interval_start(&self) -> Result<Option<DateTime<Utc>>> {
        self.execute(|conn| {
            let first: Option<i64> =
                conn.query_row("SELECT MIN(start_ms) FROM step_intervals", [], |row| {
                    row.get(0)
                })?;
            first
                .map(|ms| from_millis(ms, "start_ms"))
                .transpose()
        })
        .await
    }

    /// End of the most recently saved interval.
    pub async fn last_step_interval_end(&self) -> Result<Option<DateTime<Utc>>> {
        self.execute(|conn| {
            let last: Option<i64> =
                conn.query_row("SELECT MAX(end_ms) FROM step_intervals", [], |row| {
                    row.get(0)
                })?;
            last.map(|ms| from_millis(ms, "end_ms")).transpose()
        })
        .await
    }

    /// Known modes adjacent to `[start, end]`: the last one on a row ending
    /// at or before `start` and the first one on a row ending after `end`.
    pub async fn known_modes_around(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(Option<ModeId>, Option<ModeId>)> {
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        self.execute(move |conn| {
            let before: Option<i64> = conn
                .query_row(
                    "SELECT walking_mode_id FROM step_intervals
                     WHERE end_ms <= ?1 AND walking_mode_id IS NOT NULL
                     ORDER BY start_ms DESC, end_ms DESC, id DESC
                     LIMIT 1",
                    params![start_ms],
                    |row| row.get(0),
                )
                .optional()?;
            let after: Option<i64> = conn
                .query_row(
                    "SELECT walking_mode_id FROM step_intervals
                     WHERE end_ms > ?1 AND walking_mode_id IS NOT NULL
                     ORDER BY start_ms ASC, end_ms ASC, id ASC
                     LIMIT 1",
                    params![end_ms],
                    |row| row.get(0),
                )
                .optional()?;
            Ok((before.map(ModeId), after.map(ModeId)))
        })
        .await
    }

    pub async fn count_intervals_for_mode(&self, mode_id: ModeId) -> Result<u64> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM step_intervals WHERE walking_mode_id = ?1",
                params![mode_id.0],
                |row| row.get(0),
            )?;
            to_u64(count, "count")
        })
        .await
    }
}
