//! Step interval data model.
//!
//! A step interval is a closed span `[start_time, end_time)` whose steps were
//! settled (saved) at `end_time`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModeId;

/// Where an interval in a reconciled sequence came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum IntervalSource {
    #[default]
    Persisted,
    /// Unsaved steps read from the live counter.
    LiveTail,
    /// Zero-step filler for time nothing was recorded in.
    Gap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepInterval {
    pub id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub step_count: u64,
    pub walking_mode: Option<ModeId>,
    #[serde(default)]
    pub source: IntervalSource,
}

impl StepInterval {
    /// A not-yet-stored interval as produced by a flush.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        step_count: u64,
        walking_mode: Option<ModeId>,
    ) -> Self {
        Self {
            id: None,
            start_time,
            end_time,
            step_count,
            walking_mode,
            source: IntervalSource::Persisted,
        }
    }

    pub fn gap(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            id: None,
            start_time,
            end_time,
            step_count: 0,
            walking_mode: None,
            source: IntervalSource::Gap,
        }
    }
}
