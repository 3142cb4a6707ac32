use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::ModeId;
use crate::error::{ActivityError, ActivityResult};

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> ActivityResult<Self> {
        if start > end {
            return Err(ActivityError::InconsistentWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Whether a count settled at `at` belongs to this window.
    pub fn settles(&self, at: DateTime<Utc>) -> bool {
        self.start < at && at <= self.end
    }
}

/// What the live counter reports at the moment it is read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub steps_since_last_save: u64,
    pub active_mode: Option<ModeId>,
    pub sampled_at: DateTime<Utc>,
    /// End of the interval written by the most recent flush.
    pub last_saved_at: Option<DateTime<Utc>>,
    /// Bumped by every flush; two equal values bracket a flush-free read.
    pub flush_generation: u64,
}

/// Which neighbour an interval with an unknown mode inherits from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PropagationPolicy {
    /// Take the next known mode; trailing unknowns take the last known one.
    #[default]
    Backward,
    /// Take the previous known mode; leading unknowns take the first known one.
    Forward,
    /// Leave unknown modes alone.
    Disabled,
}

/// Known modes just outside a window: the last one settled at or before
/// its start and the first one settled after its end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NeighbouringModes {
    pub before: Option<ModeId>,
    pub after: Option<ModeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub total_steps: u64,
    pub total_distance_m: f64,
    pub total_calories_kcal: f64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

impl ActivitySummary {
    pub fn empty() -> Self {
        Self {
            total_steps: 0,
            total_distance_m: 0.0,
            total_calories_kcal: 0.0,
            window_start: None,
            window_end: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeTotals {
    pub steps: u64,
    pub distance_m: f64,
    pub calories_kcal: f64,
}

/// One chart bucket. `totals` is `None` while the bucket has neither
/// settled activity nor fully elapsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartBucket {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub totals: Option<CumulativeTotals>,
}

/// Summary plus hourly chart for one local calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayReport {
    pub title: String,
    pub summary: ActivitySummary,
    pub chart: Vec<ChartBucket>,
    pub daily_goal: u64,
    pub goal_progress: f64,
    pub has_predecessor: bool,
    pub has_successor: bool,
}
