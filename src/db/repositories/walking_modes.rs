use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime},
    models::{walking_mode::validation::validate_new_mode, ModeId, NewWalkingMode, WalkingMode},
};

const MODE_COLUMNS: &str = "id, name, step_length_m, step_frequency_hz, calorie_factor, is_active, created_at, updated_at, deleted_at";

fn row_to_mode(row: &Row) -> Result<WalkingMode> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let deleted_at: Option<String> = row.get("deleted_at")?;

    Ok(WalkingMode {
        id: ModeId(row.get("id")?),
        name: row.get("name")?,
        step_length_m: row.get("step_length_m")?,
        step_frequency_hz: row.get("step_frequency_hz")?,
        calorie_factor: row.get("calorie_factor")?,
        is_active: row.get("is_active")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
        deleted_at: parse_optional_datetime(deleted_at, "deleted_at")?,
    })
}

fn select_mode(conn: &Connection, mode_id: ModeId) -> Result<Option<WalkingMode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MODE_COLUMNS} FROM walking_modes WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![mode_id.0])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_mode(row)?)),
        None => Ok(None),
    }
}

/// Insert with an explicit id; used when restoring a backup.
pub(crate) fn insert_mode_row(conn: &Connection, mode: &WalkingMode) -> Result<()> {
    conn.execute(
        "INSERT INTO walking_modes (id, name, step_length_m, step_frequency_hz, calorie_factor, is_active, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            mode.id.0,
            mode.name,
            mode.step_length_m,
            mode.step_frequency_hz,
            mode.calorie_factor,
            mode.is_active,
            mode.created_at.to_rfc3339(),
            mode.updated_at.to_rfc3339(),
            mode.deleted_at.map(|dt| dt.to_rfc3339()),
        ],
    )?;
    Ok(())
}

impl Database {
    /// All modes, including soft-deleted ones unless `live_only` is set.
    /// Deleted modes are still needed to price historical intervals.
    pub async fn list_walking_modes(&self, live_only: bool) -> Result<Vec<WalkingMode>> {
        self.execute(move |conn| {
            let filter = if live_only {
                "WHERE deleted_at IS NULL"
            } else {
                ""
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {MODE_COLUMNS} FROM walking_modes {filter} ORDER BY id ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut modes = Vec::new();
            while let Some(row) = rows.next()? {
                modes.push(row_to_mode(row)?);
            }

            Ok(modes)
        })
        .await
    }

    pub async fn get_walking_mode(&self, mode_id: ModeId) -> Result<Option<WalkingMode>> {
        self.execute(move |conn| select_mode(conn, mode_id)).await
    }

    pub async fn get_active_walking_mode(&self) -> Result<Option<WalkingMode>> {
        self.execute(|conn| {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM walking_modes
                     WHERE is_active = 1 AND deleted_at IS NULL
                     ORDER BY id ASC
                     LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            match id {
                Some(id) => select_mode(conn, ModeId(id)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn create_walking_mode(&self, mode: NewWalkingMode) -> Result<WalkingMode> {
        validate_new_mode(&mode)?;
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let duplicate: Option<i64> = conn
                .query_row(
                    "SELECT id FROM walking_modes WHERE name = ?1 AND deleted_at IS NULL",
                    params![mode.name.trim()],
                    |row| row.get(0),
                )
                .optional()?;
            if duplicate.is_some() {
                bail!("Walking mode '{}' already exists", mode.name.trim());
            }

            conn.execute(
                "INSERT INTO walking_modes (name, step_length_m, step_frequency_hz, calorie_factor, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![
                    mode.name.trim(),
                    mode.step_length_m,
                    mode.step_frequency_hz,
                    mode.calorie_factor,
                    now,
                    now,
                ],
            )?;

            let mode_id = ModeId(conn.last_insert_rowid());
            select_mode(conn, mode_id)?.ok_or_else(|| anyhow!("Walking mode not found after insert"))
        })
        .await
    }

    /// Update a mode's factors. Modes already referenced by recorded
    /// intervals are immutable; create a new mode instead.
    pub async fn update_walking_mode(
        &self,
        mode_id: ModeId,
        mode: NewWalkingMode,
    ) -> Result<WalkingMode> {
        validate_new_mode(&mode)?;
        self.execute(move |conn| {
            let references: i64 = conn.query_row(
                "SELECT COUNT(*) FROM step_intervals WHERE walking_mode_id = ?1",
                params![mode_id.0],
                |row| row.get(0),
            )?;
            if references > 0 {
                bail!(
                    "Walking mode {mode_id} is referenced by {references} recorded intervals and cannot be changed"
                );
            }

            let rows_affected = conn.execute(
                "UPDATE walking_modes
                 SET name = ?1,
                     step_length_m = ?2,
                     step_frequency_hz = ?3,
                     calorie_factor = ?4,
                     updated_at = ?5
                 WHERE id = ?6 AND deleted_at IS NULL",
                params![
                    mode.name.trim(),
                    mode.step_length_m,
                    mode.step_frequency_hz,
                    mode.calorie_factor,
                    Utc::now().to_rfc3339(),
                    mode_id.0,
                ],
            )?;
            if rows_affected == 0 {
                bail!("Walking mode not found or already deleted");
            }

            select_mode(conn, mode_id)?.ok_or_else(|| anyhow!("Walking mode not found after update"))
        })
        .await
    }

    /// Make `mode_id` the single active mode.
    pub async fn set_active_walking_mode(&self, mode_id: ModeId) -> Result<WalkingMode> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM walking_modes WHERE id = ?1 AND deleted_at IS NULL",
                    params![mode_id.0],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                bail!("Walking mode {mode_id} not found or has been deleted");
            }

            tx.execute(
                "UPDATE walking_modes SET is_active = 0, updated_at = ?1 WHERE is_active = 1 AND id != ?2",
                params![now, mode_id.0],
            )?;
            tx.execute(
                "UPDATE walking_modes SET is_active = 1, updated_at = ?1 WHERE id = ?2",
                params![now, mode_id.0],
            )?;
            tx.commit()?;

            select_mode(conn, mode_id)?.ok_or_else(|| anyhow!("Walking mode not found after activation"))
        })
        .await
    }

    /// Soft delete: the row stays so historical intervals can still be priced.
    pub async fn soft_delete_walking_mode(&self, mode_id: ModeId) -> Result<()> {
        self.execute(move |conn| {
            let is_active: Option<bool> = conn
                .query_row(
                    "SELECT is_active FROM walking_modes WHERE id = ?1 AND deleted_at IS NULL",
                    params![mode_id.0],
                    |row| row.get(0),
                )
                .optional()?;

            match is_active {
                None => bail!("Walking mode not found or already deleted"),
                Some(true) => bail!("The active walking mode cannot be deleted; activate another mode first"),
                Some(false) => {}
            }

            conn.execute(
                "UPDATE walking_modes SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), mode_id.0],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::StepInterval;
    use tempfile::TempDir;

    fn database() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("modes.sqlite3")).unwrap();
        (dir, db)
    }

    fn hiking() -> NewWalkingMode {
        NewWalkingMode {
            name: "Hiking".into(),
            step_length_m: 0.6,
            step_frequency_hz: 1.5,
            calorie_factor: 0.9,
        }
    }

    #[tokio::test]
    async fn seeded_modes_have_walking_active() {
        let (_dir, db) = database();
        let modes = db.list_walking_modes(true).await.unwrap();
        let names: Vec<&str> = modes.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Walking", "Running"]);

        let active = db.get_active_walking_mode().await.unwrap().unwrap();
        assert_eq!(active.name, "Walking");
    }

    #[tokio::test]
    async fn activation_leaves_exactly_one_active_mode() {
        let (_dir, db) = database();
        let hiking = db.create_walking_mode(hiking()).await.unwrap();
        db.set_active_walking_mode(hiking.id).await.unwrap();

        let active: Vec<WalkingMode> = db
            .list_walking_modes(true)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, hiking.id);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let (_dir, db) = database();
        let mut duplicate = hiking();
        duplicate.name = "Running".into();
        assert!(db.create_walking_mode(duplicate).await.is_err());
    }

    #[tokio::test]
    async fn referenced_mode_cannot_be_updated() {
        let (_dir, db) = database();
        let mode = db.create_walking_mode(hiking()).await.unwrap();
        let now = Utc::now();
        db.insert_step_interval(&StepInterval::new(now, now, 12, Some(mode.id)))
            .await
            .unwrap();

        let err = db.update_walking_mode(mode.id, hiking()).await.unwrap_err();
        assert!(err.to_string().contains("cannot be changed"));
    }

    #[tokio::test]
    async fn deleted_mode_stays_resolvable_for_history() {
        let (_dir, db) = database();
        let mode = db.create_walking_mode(hiking()).await.unwrap();
        db.soft_delete_walking_mode(mode.id).await.unwrap();

        assert!(db
            .list_walking_modes(true)
            .await
            .unwrap()
            .iter()
            .all(|m| m.id != mode.id));
        let stored = db.get_walking_mode(mode.id).await.unwrap().unwrap();
        assert!(stored.deleted_at.is_some());
    }

    #[tokio::test]
    async fn active_mode_cannot_be_deleted() {
        let (_dir, db) = database();
        let active = db.get_active_walking_mode().await.unwrap().unwrap();
        assert!(db.soft_delete_walking_mode(active.id).await.is_err());
    }
}
