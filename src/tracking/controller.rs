use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{Database, Measurement, MeasurementStatus};
use crate::persistence::FlushController;

use super::TrackingState;

/// Distance measurement lifecycle, persisted in the `measurements` table.
#[derive(Clone)]
pub struct TrackingController {
    state: Arc<Mutex<TrackingState>>,
    db: Database,
}

impl TrackingController {
    /// Resume a measurement left running by a previous process.
    pub async fn restore(db: Database) -> Result<Self> {
        let state = match db
            .get_active_measurement()
            .await
            .context("failed to load running measurement")?
        {
            Some(measurement) => {
                info!(
                    "Resuming measurement {} started at {}",
                    measurement.id, measurement.started_at
                );
                TrackingState::tracking(measurement.id, measurement.started_at)
            }
            None => TrackingState::new(),
        };

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            db,
        })
    }

    pub async fn get_state(&self) -> TrackingState {
        self.state.lock().await.clone()
    }

    pub async fn window_start(&self) -> Option<chrono::DateTime<Utc>> {
        self.state.lock().await.window_start()
    }

    /// Flush the live counter, then start measuring at the flush time so
    /// nothing counted before the request leaks into the measurement.
    pub async fn start(&self, flush: &FlushController) -> Result<Measurement> {
        self.state.lock().await.begin_flush()?;

        let started_at = match flush.flush_now().await {
            Ok(report) => report.map(|report| report.saved_at).unwrap_or_else(Utc::now),
            Err(err) => {
                self.state.lock().await.abort();
                return Err(err.context("failed to flush steps before starting a measurement"));
            }
        };

        let measurement = Measurement {
            id: Uuid::new_v4().to_string(),
            started_at,
            stopped_at: None,
            status: MeasurementStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        if let Err(err) = self.db.insert_measurement(&measurement).await {
            self.state.lock().await.abort();
            return Err(err.context("failed to persist measurement"));
        }

        self.state
            .lock()
            .await
            .confirm(measurement.id.clone(), started_at)?;
        info!("Measurement {} started at {started_at}", measurement.id);
        Ok(measurement)
    }

    pub async fn stop(&self) -> Result<Measurement> {
        let (id, started_at) = self.state.lock().await.finish()?;
        let stopped_at = Utc::now();

        if let Err(err) = self.db.complete_measurement(&id, stopped_at).await {
            warn!("Failed to complete measurement {id}: {err:?}");
            *self.state.lock().await = TrackingState::tracking(id, started_at);
            return Err(err);
        }

        info!("Measurement {id} stopped");
        Ok(Measurement {
            id,
            started_at,
            stopped_at: Some(stopped_at),
            status: MeasurementStatus::Completed,
            created_at: started_at,
            updated_at: stopped_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::StepCounter;
    use crate::db::ModeId;
    use crate::tracking::TrackingStatus;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("pacelog.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn start_flushes_pending_steps_first() {
        let (_dir, db) = open();
        let counter = StepCounter::new();
        counter
            .activate(Utc::now() - Duration::minutes(5), Some(ModeId(1)), None)
            .await
            .unwrap();
        counter.record_steps(40).await.unwrap();
        let flush = FlushController::new(counter.clone(), Arc::new(db.clone()));
        let tracking = TrackingController::restore(db.clone()).await.unwrap();

        let measurement = tracking.start(&flush).await.unwrap();

        let stored = db.list_step_intervals().await.unwrap();
        assert_eq!(stored.len(), 1);
        // The flushed steps settle exactly at the start and stay outside.
        assert_eq!(stored[0].end_time, measurement.started_at);
        assert_eq!(tracking.window_start().await, Some(measurement.started_at));
        assert_eq!(counter.state().await.unwrap().steps_since_last_save, 0);
    }

    #[tokio::test]
    async fn running_measurement_survives_a_restart() {
        let (_dir, db) = open();
        let flush = FlushController::new(StepCounter::new(), Arc::new(db.clone()));
        let first = TrackingController::restore(db.clone()).await.unwrap();
        let measurement = first.start(&flush).await.unwrap();

        let resumed = TrackingController::restore(db.clone()).await.unwrap();
        let state = resumed.get_state().await;
        assert_eq!(state.status, TrackingStatus::Tracking);
        assert_eq!(state.measurement_id.as_deref(), Some(measurement.id.as_str()));

        let stopped = resumed.stop().await.unwrap();
        assert_eq!(stopped.status, MeasurementStatus::Completed);
        assert!(db.get_active_measurement().await.unwrap().is_none());
        assert!(resumed.stop().await.is_err());
    }

    #[tokio::test]
    async fn second_start_is_refused() {
        let (_dir, db) = open();
        let flush = FlushController::new(StepCounter::new(), Arc::new(db.clone()));
        let tracking = TrackingController::restore(db).await.unwrap();

        tracking.start(&flush).await.unwrap();
        assert!(tracking.start(&flush).await.is_err());
    }
}
