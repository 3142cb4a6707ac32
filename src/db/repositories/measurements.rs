use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_status},
    models::{Measurement, MeasurementStatus},
};

fn row_to_measurement(row: &Row) -> Result<Measurement> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Measurement {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_status(&status)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_measurement(&self, measurement: &Measurement) -> Result<()> {
        let record = measurement.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO measurements (id, started_at, stopped_at, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_active_measurement(&self) -> Result<Option<Measurement>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, stopped_at, status, created_at, updated_at
                 FROM measurements
                 WHERE status = 'Running'
                 ORDER BY started_at DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query([])?;
            let measurement = match rows.next()? {
                Some(row) => Some(row_to_measurement(row)?),
                None => None,
            };
            Ok(measurement)
        })
        .await
    }

    pub async fn complete_measurement(
        &self,
        measurement_id: &str,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        let measurement_id = measurement_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE measurements
                 SET status = ?1,
                     stopped_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4 AND status = 'Running'",
                params![
                    MeasurementStatus::Completed.as_str(),
                    stopped_at.to_rfc3339(),
                    stopped_at.to_rfc3339(),
                    measurement_id,
                ],
            )?;

            if rows_affected == 0 {
                bail!("Measurement {measurement_id} not found or already completed");
            }
            Ok(())
        })
        .await
    }

    pub async fn list_measurements(&self, limit: usize) -> Result<Vec<Measurement>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, stopped_at, status, created_at, updated_at
                 FROM measurements
                 ORDER BY started_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut measurements = Vec::new();
            while let Some(row) = rows.next()? {
                measurements.push(row_to_measurement(row)?);
            }

            Ok(measurements)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn measurement(id: &str, started_at: DateTime<Utc>) -> Measurement {
        Measurement {
            id: id.into(),
            started_at,
            stopped_at: None,
            status: MeasurementStatus::Running,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    #[tokio::test]
    async fn completed_measurement_is_no_longer_active() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("m.sqlite3")).unwrap();
        let started = Utc::now();

        db.insert_measurement(&measurement("m-1", started)).await.unwrap();
        let active = db.get_active_measurement().await.unwrap().unwrap();
        assert_eq!(active.id, "m-1");

        db.complete_measurement("m-1", Utc::now()).await.unwrap();
        assert!(db.get_active_measurement().await.unwrap().is_none());
        assert!(db.complete_measurement("m-1", Utc::now()).await.is_err());

        let history = db.list_measurements(10).await.unwrap();
        assert_eq!(history[0].status, MeasurementStatus::Completed);
        assert!(history[0].stopped_at.is_some());
    }
}
