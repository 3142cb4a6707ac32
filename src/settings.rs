use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::activity::PropagationPolicy;
use crate::db::ModeId;
use crate::units::{EnergyUnit, UnitSystem};

const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30 * 60;
const DEBUG_FLUSH_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub body_weight_kg: f64,
    pub unit_system: UnitSystem,
    pub energy_unit: EnergyUnit,
    pub daily_step_goal: u64,
    pub default_mode_id: Option<ModeId>,
    pub propagation_policy: PropagationPolicy,
    pub flush_interval_secs: u64,
    pub chart_bucket_minutes: u32,
    /// Local offset east of UTC used for day boundaries and chart labels.
    pub utc_offset_minutes: i32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            body_weight_kg: 70.0,
            unit_system: UnitSystem::Metric,
            energy_unit: EnergyUnit::Kilocalories,
            daily_step_goal: 10_000,
            default_mode_id: None,
            propagation_policy: PropagationPolicy::Backward,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            chart_bucket_minutes: 60,
            utc_offset_minutes: 0,
        }
    }
}

impl UserSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.body_weight_kg.is_finite() && self.body_weight_kg > 0.0) {
            bail!("body weight must be a positive number of kilograms");
        }
        if self.flush_interval_secs == 0 {
            bail!("flush interval must be at least one second");
        }
        if self.chart_bucket_minutes == 0 {
            bail!("chart buckets must be at least one minute wide");
        }
        if self.utc_offset().is_none() {
            bail!("UTC offset {} minutes is out of range", self.utc_offset_minutes);
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }
}

/// JSON-backed settings. Missing or unreadable content falls back to
/// defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
    debug_mode: bool,
}

impl SettingsStore {
    pub fn new(path: PathBuf, debug_mode: bool) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(settings) if settings.validate().is_ok() => settings,
                Ok(_) | Err(_) => {
                    warn!("Ignoring invalid settings file {}", path.display());
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
            debug_mode,
        })
    }

    pub fn get(&self) -> UserSettings {
        self.read().clone()
    }

    /// Flush period in effect; debug mode shortens it.
    pub fn flush_interval_secs(&self) -> u64 {
        let configured = self.read().flush_interval_secs;
        if self.debug_mode {
            configured.min(DEBUG_FLUSH_INTERVAL_SECS)
        } else {
            configured
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.read().utc_offset().unwrap_or_else(|| Utc.fix())
    }

    pub fn update<F>(&self, apply: F) -> Result<UserSettings>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut guard = self.write();
        let mut updated = guard.clone();
        apply(&mut updated);
        updated.validate()?;
        self.persist(&updated)?;
        *guard = updated.clone();
        Ok(updated)
    }

    pub fn replace(&self, settings: UserSettings) -> Result<()> {
        self.update(|current| *current = settings).map(|_| ())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
