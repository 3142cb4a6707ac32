use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackingStatus {
    #[default]
    NotTracking,
    /// Start requested; waiting for the live counter to be persisted.
    AwaitingFlush,
    Tracking,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub status: TrackingStatus,
    pub measurement_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracking(measurement_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            status: TrackingStatus::Tracking,
            measurement_id: Some(measurement_id),
            started_at: Some(started_at),
        }
    }

    /// Start of the measured window; `None` unless tracking.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        match self.status {
            TrackingStatus::Tracking => self.started_at,
            _ => None,
        }
    }

    pub fn begin_flush(&mut self) -> Result<()> {
        match self.status {
            TrackingStatus::NotTracking => {
                self.status = TrackingStatus::AwaitingFlush;
                Ok(())
            }
            TrackingStatus::AwaitingFlush => bail!("a measurement is already starting"),
            TrackingStatus::Tracking => bail!("a measurement is already running"),
        }
    }

    pub fn confirm(&mut self, measurement_id: String, started_at: DateTime<Utc>) -> Result<()> {
        if self.status != TrackingStatus::AwaitingFlush {
            bail!("no measurement start pending");
        }
        *self = Self::tracking(measurement_id, started_at);
        Ok(())
    }

    pub fn abort(&mut self) {
        if self.status == TrackingStatus::AwaitingFlush {
            *self = Self::default();
        }
    }

    /// Leave `Tracking`, returning the measurement that was running.
    pub fn finish(&mut self) -> Result<(String, DateTime<Utc>)> {
        match (self.status, self.measurement_id.clone(), self.started_at) {
            (TrackingStatus::Tracking, Some(id), Some(started_at)) => {
                *self = Self::default();
                Ok((id, started_at))
            }
            (TrackingStatus::AwaitingFlush, ..) => bail!("measurement start still in progress"),
            _ => bail!("no measurement running"),
        }
    }
}
