//! In-memory step counter shared by the input loop, the flush worker and
//! readers.
//!
//! Readers only take snapshots. Draining the counter goes through
//! [`StepCounter::flush`], which keeps the lock across the write so no reader
//! can observe the count reset before the interval is stored.

mod state;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use log::debug;
use tokio::sync::Mutex;

use crate::activity::{LiveCounter, LiveSnapshot};
use crate::db::{Database, ModeId, StepInterval};

pub use state::CounterState;

/// Durable destination of flushed intervals.
#[async_trait]
pub trait IntervalSink: Send + Sync {
    async fn persist(&self, interval: &StepInterval) -> Result<i64>;
}

#[async_trait]
impl IntervalSink for Database {
    async fn persist(&self, interval: &StepInterval) -> Result<i64> {
        self.insert_step_interval(interval).await
    }
}

/// Result of one flush. `interval.id` is `None` when nothing was pending
/// and no row was written.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub interval: StepInterval,
    pub saved_at: DateTime<Utc>,
}

impl FlushReport {
    pub fn wrote_row(&self) -> bool {
        self.interval.id.is_some()
    }
}

#[derive(Clone, Default)]
pub struct StepCounter {
    state: Arc<Mutex<Option<CounterState>>>,
}

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn activate(
        &self,
        started_at: DateTime<Utc>,
        active_mode: Option<ModeId>,
        last_saved_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            bail!("step counter already active");
        }
        *guard = Some(CounterState::new(started_at, active_mode, last_saved_at));
        Ok(())
    }

    /// Drop the counter. Unsaved steps are returned to the caller, who is
    /// expected to have flushed first.
    pub async fn deactivate(&self) -> Option<CounterState> {
        self.state.lock().await.take()
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn state(&self) -> Option<CounterState> {
        self.state.lock().await.clone()
    }

    /// Add detected steps; returns the unsaved total.
    pub async fn record_steps(&self, steps: u64) -> Result<u64> {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            bail!("step counter is not active");
        };
        state.record(steps);
        Ok(state.steps_since_last_save)
    }

    pub async fn active_mode(&self) -> Option<ModeId> {
        self.state
            .lock()
            .await
            .as_ref()
            .and_then(|state| state.active_mode)
    }

    /// Persist the unsaved steps as one interval ending at `at` and reset
    /// the count. With nothing pending only the cursor moves. `None` when
    /// the counter is inactive.
    ///
    /// A failed write leaves the count untouched.
    pub(crate) async fn flush<S>(&self, sink: &S, at: DateTime<Utc>) -> Result<Option<FlushReport>>
    where
        S: IntervalSink + ?Sized,
    {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Ok(None);
        };
        flush_locked(state, sink, at).await.map(Some)
    }

    /// Flush the pending steps under the current mode, then switch.
    pub(crate) async fn switch_mode<S>(
        &self,
        sink: &S,
        mode: ModeId,
        at: DateTime<Utc>,
    ) -> Result<FlushReport>
    where
        S: IntervalSink + ?Sized,
    {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            bail!("step counter is not active");
        };
        let report = flush_locked(state, sink, at).await?;
        state.active_mode = Some(mode);
        Ok(report)
    }
}

async fn flush_locked<S>(state: &mut CounterState, sink: &S, at: DateTime<Utc>) -> Result<FlushReport>
where
    S: IntervalSink + ?Sized,
{
    // Stored times have millisecond resolution.
    let mut at = at.trunc_subsecs(3);

    if state.steps_since_last_save == 0 {
        state.advance_cursor(at);
        let saved_at = state.save_cursor();
        debug!("Nothing to flush; save cursor at {saved_at}");
        return Ok(FlushReport {
            interval: state.pending_interval(saved_at),
            saved_at,
        });
    }

    // Counted steps always get an interval that ends after its start.
    if at <= state.save_cursor() {
        at = state.save_cursor() + Duration::milliseconds(1);
    }
    let mut interval = state.pending_interval(at);

    let row_id = sink
        .persist(&interval)
        .await
        .context("failed to persist step interval")?;
    interval.id = Some(row_id);
    state.mark_saved(at);

    Ok(FlushReport {
        interval,
        saved_at: at,
    })
}

#[async_trait]
impl LiveCounter for StepCounter {
    async fn snapshot(&self) -> Option<LiveSnapshot> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|state| state.snapshot(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex as StdMutex;

    const WALKING: ModeId = ModeId(1);
    const RUNNING: ModeId = ModeId(2);

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[derive(Default)]
    struct RecordingSink {
        rows: StdMutex<Vec<StepInterval>>,
        fail: bool,
    }

    #[async_trait]
    impl IntervalSink for RecordingSink {
        async fn persist(&self, interval: &StepInterval) -> Result<i64> {
            if self.fail {
                bail!("database is locked");
            }
            let mut rows = self.rows.lock().unwrap();
            rows.push(interval.clone());
            Ok(rows.len() as i64)
        }
    }

    #[tokio::test]
    async fn snapshots_do_not_drain_the_counter() {
        let counter = StepCounter::new();
        counter.activate(at(0), Some(WALKING), None).await.unwrap();
        counter.record_steps(30).await.unwrap();
        counter.record_steps(12).await.unwrap();

        let first = counter.snapshot().await.unwrap();
        let second = counter.snapshot().await.unwrap();

        assert_eq!(first.steps_since_last_save, 42);
        assert_eq!(second.steps_since_last_save, 42);
        assert_eq!(first.flush_generation, second.flush_generation);
    }

    #[tokio::test]
    async fn flush_writes_one_interval_and_resets() {
        let counter = StepCounter::new();
        let sink = RecordingSink::default();
        counter.activate(at(0), Some(WALKING), None).await.unwrap();
        counter.record_steps(250).await.unwrap();

        let report = counter.flush(&sink, at(30)).await.unwrap().unwrap();

        assert!(report.wrote_row());
        assert_eq!(report.interval.start_time, at(0));
        assert_eq!(report.interval.end_time, at(30));
        assert_eq!(report.interval.step_count, 250);

        let state = counter.state().await.unwrap();
        assert_eq!(state.steps_since_last_save, 0);
        assert_eq!(state.last_saved_at, Some(at(30)));
        assert_eq!(state.flush_generation, 1);
        assert_eq!(state.session_steps, 250);
    }

    #[tokio::test]
    async fn empty_flush_moves_the_cursor_without_a_row() {
        let counter = StepCounter::new();
        let sink = RecordingSink::default();
        counter.activate(at(0), Some(WALKING), None).await.unwrap();

        let report = counter.flush(&sink, at(30)).await.unwrap().unwrap();
        assert!(!report.wrote_row());

        counter.record_steps(5).await.unwrap();
        counter.flush(&sink, at(60)).await.unwrap();

        let rows = sink.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_time, at(30));
        assert_eq!(counter.state().await.unwrap().flush_generation, 1);
    }

    #[tokio::test]
    async fn failed_write_keeps_the_steps() {
        let counter = StepCounter::new();
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        counter.activate(at(0), Some(WALKING), None).await.unwrap();
        counter.record_steps(80).await.unwrap();

        assert!(counter.flush(&sink, at(30)).await.is_err());

        let state = counter.state().await.unwrap();
        assert_eq!(state.steps_since_last_save, 80);
        assert_eq!(state.flush_generation, 0);
        assert_eq!(state.last_saved_at, None);
    }

    #[tokio::test]
    async fn mode_switch_saves_pending_steps_under_the_old_mode() {
        let counter = StepCounter::new();
        let sink = RecordingSink::default();
        counter.activate(at(0), Some(WALKING), None).await.unwrap();
        counter.record_steps(100).await.unwrap();

        counter.switch_mode(&sink, RUNNING, at(10)).await.unwrap();
        counter.record_steps(40).await.unwrap();

        let rows = sink.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].walking_mode, Some(WALKING));

        let snapshot = counter.snapshot().await.unwrap();
        assert_eq!(snapshot.active_mode, Some(RUNNING));
        assert_eq!(snapshot.steps_since_last_save, 40);
    }

    #[tokio::test]
    async fn inactive_counter_reports_nothing() {
        let counter = StepCounter::new();
        let sink = RecordingSink::default();

        assert!(counter.snapshot().await.is_none());
        assert!(counter.flush(&sink, at(0)).await.unwrap().is_none());
        assert!(counter.record_steps(1).await.is_err());
        assert!(counter.switch_mode(&sink, RUNNING, at(0)).await.is_err());
    }

    #[tokio::test]
    async fn counter_cannot_be_activated_twice() {
        let counter = StepCounter::new();
        counter.activate(at(0), None, None).await.unwrap();
        assert!(counter.activate(at(1), None, None).await.is_err());
        assert!(counter.deactivate().await.is_some());
        assert!(!counter.is_active().await);
    }
}
