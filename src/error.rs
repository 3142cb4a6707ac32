use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::ModeId;

/// Failures of the reconciliation and summary engine.
///
/// Only `StoreUnavailable` is worth retrying. `UnknownMode` never escapes a
/// summary; the aggregator falls back to the default mode instead.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("step store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("inconsistent window: start {start} is after end {end}")]
    InconsistentWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("unknown walking mode {0}")]
    UnknownMode(ModeId),

    #[error("stored intervals overlap or are out of order: {detail}")]
    OverlappingIntervals { detail: String },
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityError::StoreUnavailable(_))
    }
}

pub type ActivityResult<T> = std::result::Result<T, ActivityError>;
