//! Walking mode data model.
//!
//! A walking mode is the activity profile used to turn steps into distance
//! and calories. Intervals reference modes by id only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ModeId(pub i64);

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalkingMode {
    pub id: ModeId,
    pub name: String,
    /// Metres covered per step.
    pub step_length_m: f64,
    pub step_frequency_hz: f64,
    /// kcal per kg of body weight per km.
    pub calorie_factor: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WalkingMode {
    pub fn distance_m(&self, steps: u64) -> f64 {
        steps as f64 * self.step_length_m
    }

    pub fn calories_kcal(&self, steps: u64, body_weight_kg: f64) -> f64 {
        body_weight_kg * self.calorie_factor * self.distance_m(steps) / 1000.0
    }

    /// Walking speed implied by the profile, in metres per second.
    pub fn speed_mps(&self) -> f64 {
        self.step_length_m * self.step_frequency_hz
    }
}

/// Fields supplied when creating a walking mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWalkingMode {
    pub name: String,
    pub step_length_m: f64,
    pub step_frequency_hz: f64,
    pub calorie_factor: f64,
}

pub mod validation {
    use super::NewWalkingMode;
    use anyhow::{bail, Result};

    const MAX_NAME_LEN: usize = 64;
    const MAX_STEP_LENGTH_M: f64 = 3.0;

    pub fn validate_new_mode(mode: &NewWalkingMode) -> Result<()> {
        let name = mode.name.trim();
        if name.is_empty() {
            bail!("Walking mode name must not be empty");
        }
        if name.len() > MAX_NAME_LEN {
            bail!("Walking mode name exceeds {MAX_NAME_LEN} characters");
        }
        if !(mode.step_length_m > 0.0 && mode.step_length_m <= MAX_STEP_LENGTH_M) {
            bail!("Invalid step length. Must be between 0 and {MAX_STEP_LENGTH_M} metres");
        }
        if !(mode.step_frequency_hz > 0.0) {
            bail!("Invalid step frequency. Must be positive");
        }
        if !(mode.calorie_factor >= 0.0 && mode.calorie_factor.is_finite()) {
            bail!("Invalid calorie factor. Must be a non-negative number");
        }
        Ok(())
    }
}
