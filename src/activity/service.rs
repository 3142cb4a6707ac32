use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use log::{debug, warn};

use crate::db::StepInterval;
use crate::error::ActivityResult;

use super::reconcile::reconcile_intervals;
use super::registry::ModeRegistry;
use super::store::{LiveCounter, StepIntervalStore};
use super::summary::{bucketize, summarize, BucketSpec};
use super::types::{
    ActivitySummary, ChartBucket, DayReport, LiveSnapshot, NeighbouringModes, PropagationPolicy,
    Window,
};

const DEFAULT_READ_ATTEMPTS: usize = 3;

/// What step counts are priced with.
pub struct Valuation<'a, R: ?Sized> {
    pub modes: &'a R,
    pub body_weight_kg: f64,
}

/// Pull-based entry point: every call reads the store and the live counter
/// afresh and returns a new result.
pub struct ActivityService<S, L> {
    store: S,
    live: L,
    policy: PropagationPolicy,
    read_attempts: usize,
}

impl<S, L> ActivityService<S, L>
where
    S: StepIntervalStore,
    L: LiveCounter,
{
    pub fn new(store: S, live: L, policy: PropagationPolicy) -> Self {
        Self {
            store,
            live,
            policy,
            read_attempts: DEFAULT_READ_ATTEMPTS,
        }
    }

    pub fn with_read_attempts(mut self, attempts: usize) -> Self {
        self.read_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Interval sequence covering `[window_start, window_end)`.
    ///
    /// No start (nothing being measured) yields an empty sequence. No end
    /// means up to the live counter's sampling time, or now when no counter
    /// is running.
    pub async fn reconcile(
        &self,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> ActivityResult<Vec<StepInterval>> {
        let Some(start) = window_start else {
            return Ok(Vec::new());
        };
        let requested_end = window_end.unwrap_or_else(Utc::now);
        // Validate before touching the store.
        Window::new(start, requested_end)?;

        let (persisted, neighbours, snapshot) =
            self.consistent_read(start, requested_end).await?;

        let end = match (window_end, &snapshot) {
            // The counter's own save cursor bounds its sampling time from below.
            (None, Some(snapshot)) => snapshot
                .sampled_at
                .max(snapshot.last_saved_at.unwrap_or(start))
                .max(start),
            _ => requested_end,
        };
        let window = Window::new(start, end)?;

        reconcile_intervals(window, persisted, snapshot.as_ref(), neighbours, self.policy)
    }

    pub async fn summary<R>(
        &self,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
        valuation: Valuation<'_, R>,
    ) -> ActivityResult<ActivitySummary>
    where
        R: ModeRegistry + ?Sized,
    {
        let sequence = self.reconcile(window_start, window_end).await?;
        Ok(summarize(&sequence, valuation.modes, valuation.body_weight_kg))
    }

    pub async fn chart<R>(
        &self,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
        spec: &BucketSpec,
        valuation: Valuation<'_, R>,
    ) -> ActivityResult<Vec<ChartBucket>>
    where
        R: ModeRegistry + ?Sized,
    {
        let sequence = self.reconcile(window_start, window_end).await?;
        Ok(bucketize(
            &sequence,
            spec,
            Utc::now(),
            valuation.modes,
            valuation.body_weight_kg,
        ))
    }

    /// Summary and hourly chart of one calendar day in `offset`.
    pub async fn day_report<R>(
        &self,
        day: NaiveDate,
        offset: FixedOffset,
        now: DateTime<Utc>,
        daily_goal: u64,
        valuation: Valuation<'_, R>,
    ) -> ActivityResult<DayReport>
    where
        R: ModeRegistry + ?Sized,
    {
        let day_start = local_midnight(day, offset);
        let day_end = day_start + Duration::days(1);

        let sequence = self.reconcile(Some(day_start), Some(day_end)).await?;
        let summary = summarize(&sequence, valuation.modes, valuation.body_weight_kg);
        let chart = bucketize(
            &sequence,
            &BucketSpec::hourly(offset),
            now,
            valuation.modes,
            valuation.body_weight_kg,
        );

        let has_predecessor = self
            .store
            .first_recorded_timestamp()
            .await?
            .is_some_and(|first| first < day_start);
        let today = now.with_timezone(&offset).date_naive();

        let goal_progress = if daily_goal == 0 {
            0.0
        } else {
            summary.total_steps as f64 / daily_goal as f64
        };

        Ok(DayReport {
            title: day.format("%a, %d %b %Y").to_string(),
            summary,
            chart,
            daily_goal,
            goal_progress,
            has_predecessor,
            has_successor: day < today,
        })
    }

    /// Read the store bracketed by two counter samples. A changed flush
    /// generation means a flush landed in between; retry, and after the
    /// last attempt accept the latest pair.
    async fn consistent_read(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ActivityResult<(Vec<StepInterval>, NeighbouringModes, Option<LiveSnapshot>)> {
        let mut attempt = 1;
        loop {
            let before = self.live.snapshot().await;
            let persisted = self.store.query_range(start, end).await?;
            let neighbours = self.store.neighbouring_modes(start, end).await?;
            let after = self.live.snapshot().await;

            let raced = match (&before, &after) {
                (Some(before), Some(after)) => before.flush_generation != after.flush_generation,
                (None, None) => false,
                _ => true,
            };

            if !raced {
                return Ok((persisted, neighbours, after));
            }
            if attempt >= self.read_attempts {
                warn!("Flush kept racing the store read; accepting attempt {attempt}");
                return Ok((persisted, neighbours, after));
            }
            debug!("Flush raced the store read (attempt {attempt}); retrying");
            attempt += 1;
        }
    }
}

/// UTC instant of local midnight at the start of `day`.
pub fn local_midnight(day: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = day.and_hms_opt(0, 0, 0).unwrap_or_default();
    // A fixed offset maps every local time to exactly one instant.
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}
