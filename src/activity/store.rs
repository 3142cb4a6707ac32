use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{Database, StepInterval};
use crate::error::{ActivityError, ActivityResult};

use super::types::{LiveSnapshot, NeighbouringModes};

/// Read side of persisted step history.
#[async_trait]
pub trait StepIntervalStore: Send + Sync {
    /// Intervals touching `[start, end]`, ordered by start time. May
    /// include intervals the window does not own.
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ActivityResult<Vec<StepInterval>>;

    /// Known modes nearest to `[start, end]` from outside: the last one
    /// settled at or before `start`, the first one settled after `end`.
    async fn neighbouring_modes(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ActivityResult<NeighbouringModes>;

    /// Start of the oldest recorded interval.
    async fn first_recorded_timestamp(&self) -> ActivityResult<Option<DateTime<Utc>>>;
}

/// Read-only view of the in-memory counter.
#[async_trait]
pub trait LiveCounter: Send + Sync {
    /// `None` when no counter is running.
    async fn snapshot(&self) -> Option<LiveSnapshot>;
}

#[async_trait]
impl StepIntervalStore for Database {
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ActivityResult<Vec<StepInterval>> {
        self.query_step_intervals(start, end)
            .await
            .map_err(ActivityError::StoreUnavailable)
    }

    async fn neighbouring_modes(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ActivityResult<NeighbouringModes> {
        let (before, after) = self
            .known_modes_around(start, end)
            .await
            .map_err(ActivityError::StoreUnavailable)?;
        Ok(NeighbouringModes { before, after })
    }

    async fn first_recorded_timestamp(&self) -> ActivityResult<Option<DateTime<Utc>>> {
        self.first_step_interval_start()
            .await
            .map_err(ActivityError::StoreUnavailable)
    }
}

/// Stand-in when only persisted history is available.
pub struct NoLiveCounter;

#[async_trait]
impl LiveCounter for NoLiveCounter {
    async fn snapshot(&self) -> Option<LiveSnapshot> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ModeId;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    #[tokio::test]
    async fn database_serves_range_queries() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap();
        for (start, end, steps) in [(0, 30, 10), (30, 60, 20), (90, 120, 30)] {
            db.insert_step_interval(&StepInterval::new(
                t0 + Duration::minutes(start),
                t0 + Duration::minutes(end),
                steps,
                Some(ModeId(1)),
            ))
            .await
            .unwrap();
        }

        db.insert_step_interval(&StepInterval::new(
            t0 + Duration::minutes(150),
            t0 + Duration::minutes(160),
            5,
            None,
        ))
        .await
        .unwrap();

        let store: &dyn StepIntervalStore = &db;
        let touching = store
            .query_range(t0 + Duration::minutes(45), t0 + Duration::minutes(90))
            .await
            .unwrap();
        let steps: Vec<u64> = touching.iter().map(|i| i.step_count).collect();
        // Ends after the start and starts no later than the end.
        assert_eq!(steps, vec![20, 30]);

        assert_eq!(store.first_recorded_timestamp().await.unwrap(), Some(t0));

        let neighbours = store
            .neighbouring_modes(t0 + Duration::minutes(60), t0 + Duration::minutes(100))
            .await
            .unwrap();
        assert_eq!(neighbours.before, Some(ModeId(1)));
        assert_eq!(neighbours.after, Some(ModeId(1)));

        // Modeless rows are skipped; nothing known settles after the last one.
        let neighbours = store
            .neighbouring_modes(t0, t0 + Duration::minutes(120))
            .await
            .unwrap();
        assert_eq!(neighbours, NeighbouringModes::default());
        assert!(NoLiveCounter.snapshot().await.is_none());
    }
}
