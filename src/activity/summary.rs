//! Reduces a reconciled interval sequence into totals and chart buckets.

use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::db::StepInterval;

use super::registry::ModeRegistry;
use super::types::{ActivitySummary, ChartBucket, CumulativeTotals};

/// Totals over the whole sequence. Always recomputed from scratch.
pub fn summarize<R>(intervals: &[StepInterval], modes: &R, body_weight_kg: f64) -> ActivitySummary
where
    R: ModeRegistry + ?Sized,
{
    let (Some(first), Some(last)) = (intervals.first(), intervals.last()) else {
        return ActivitySummary::empty();
    };

    let totals = intervals.iter().fold(CumulativeTotals::default(), |acc, interval| {
        add_interval(acc, interval, modes, body_weight_kg)
    });

    ActivitySummary {
        total_steps: totals.steps,
        total_distance_m: totals.distance_m,
        total_calories_kcal: totals.calories_kcal,
        window_start: Some(first.start_time),
        window_end: Some(last.end_time),
    }
}

/// Grid used to chart a sequence.
#[derive(Debug, Clone, Copy)]
pub struct BucketSpec {
    pub width: Duration,
    /// Offset the labels are rendered in.
    pub offset: FixedOffset,
}

/// Most buckets a chart may be asked for.
pub const MAX_CHART_BUCKETS: i64 = 10_000;

impl BucketSpec {
    pub fn hourly(offset: FixedOffset) -> Self {
        Self {
            width: Duration::hours(1),
            offset,
        }
    }

    /// Buckets needed to tile `[start, end)`, at least one.
    pub fn bucket_count(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let width_ms = self.width.num_milliseconds().max(1);
        let extent_ms = (end - start).num_milliseconds().max(0);
        ((extent_ms + width_ms - 1) / width_ms).max(1)
    }
}

/// Running totals per bucket, buckets tiling the sequence from its start.
///
/// Buckets are `(start, end]`: an interval is attributed wholly to the
/// bucket its `end_time` falls in. A bucket with no interval settled by
/// `now` that has not fully elapsed is absent.
pub fn bucketize<R>(
    intervals: &[StepInterval],
    spec: &BucketSpec,
    now: DateTime<Utc>,
    modes: &R,
    body_weight_kg: f64,
) -> Vec<ChartBucket>
where
    R: ModeRegistry + ?Sized,
{
    let width_ms = spec.width.num_milliseconds();
    let (Some(first), Some(last)) = (intervals.first(), intervals.last()) else {
        return Vec::new();
    };
    if width_ms <= 0 {
        return Vec::new();
    }

    let origin = first.start_time;
    let bucket_count = spec.bucket_count(origin, last.end_time) as usize;

    let mut per_bucket = vec![CumulativeTotals::default(); bucket_count];
    let mut settled = vec![false; bucket_count];

    for interval in intervals {
        let index = bucket_index(origin, interval.end_time, width_ms).min(bucket_count - 1);
        per_bucket[index] = add_interval(per_bucket[index], interval, modes, body_weight_kg);
        if interval.end_time <= now {
            settled[index] = true;
        }
    }

    let mut running = CumulativeTotals::default();
    per_bucket
        .into_iter()
        .zip(settled)
        .enumerate()
        .map(|(index, (bucket_totals, has_settled))| {
            let start = origin + Duration::milliseconds(width_ms * index as i64);
            let end = start + spec.width;

            running.steps += bucket_totals.steps;
            running.distance_m += bucket_totals.distance_m;
            running.calories_kcal += bucket_totals.calories_kcal;

            ChartBucket {
                label: start.with_timezone(&spec.offset).format("%H:%M").to_string(),
                start,
                end,
                totals: (has_settled || end <= now).then_some(running),
            }
        })
        .collect()
}

fn bucket_index(origin: DateTime<Utc>, end_time: DateTime<Utc>, width_ms: i64) -> usize {
    let offset_ms = (end_time - origin).num_milliseconds();
    if offset_ms <= 0 {
        0
    } else {
        ((offset_ms - 1) / width_ms) as usize
    }
}

fn add_interval<R>(
    acc: CumulativeTotals,
    interval: &StepInterval,
    modes: &R,
    body_weight_kg: f64,
) -> CumulativeTotals
where
    R: ModeRegistry + ?Sized,
{
    if interval.step_count == 0 {
        return acc;
    }
    let mode = modes.resolve(interval.walking_mode);
    CumulativeTotals {
        steps: acc.steps + interval.step_count,
        distance_m: acc.distance_m + mode.distance_m(interval.step_count),
        calories_kcal: acc.calories_kcal + mode.calories_kcal(interval.step_count, body_weight_kg),
    }
}
