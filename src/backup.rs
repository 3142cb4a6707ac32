//! JSON export and restore of walking modes, step history and settings.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::db::repositories::step_intervals::insert_interval_row;
use crate::db::repositories::walking_modes::insert_mode_row;
use crate::db::{Database, StepInterval, WalkingMode};
use crate::settings::{SettingsStore, UserSettings};

pub const BACKUP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub walking_modes: Vec<WalkingMode>,
    pub step_intervals: Vec<StepInterval>,
    pub settings: UserSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub walking_modes: usize,
    pub step_intervals: usize,
}

impl Backup {
    pub async fn collect(db: &Database, settings: &SettingsStore) -> Result<Self> {
        Ok(Self {
            format_version: BACKUP_FORMAT_VERSION,
            exported_at: Utc::now(),
            walking_modes: db.list_walking_modes(false).await?,
            step_intervals: db.list_step_intervals().await?,
            settings: settings.get(),
        })
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write backup to {}", path.display()))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read backup from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("{} is not a pacelog backup", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version != BACKUP_FORMAT_VERSION {
            bail!(
                "Unsupported backup format version {} (expected {BACKUP_FORMAT_VERSION})",
                self.format_version
            );
        }

        let mut ids = HashSet::new();
        for mode in &self.walking_modes {
            if !ids.insert(mode.id) {
                bail!("Backup lists walking mode {} twice", mode.id);
            }
        }
        let active = self
            .walking_modes
            .iter()
            .filter(|mode| mode.is_active && mode.deleted_at.is_none())
            .count();
        if active != 1 {
            bail!("Backup must have exactly one active walking mode, found {active}");
        }

        let mut previous_end: Option<DateTime<Utc>> = None;
        for interval in &self.step_intervals {
            if interval.start_time > interval.end_time {
                bail!("Backup interval starting {} ends before it starts", interval.start_time);
            }
            if previous_end.is_some_and(|end| interval.start_time < end) {
                bail!("Backup intervals overlap or are out of order at {}", interval.start_time);
            }
            if let Some(mode) = interval.walking_mode {
                if !ids.contains(&mode) {
                    bail!("Backup interval at {} references unknown mode {mode}", interval.start_time);
                }
            }
            previous_end = Some(interval.end_time);
        }

        self.settings.validate().context("Backup settings are invalid")
    }

    /// Replace modes, intervals and settings with the backup content. The
    /// database part happens in one transaction.
    pub async fn restore(self, db: &Database, settings: &SettingsStore) -> Result<RestoreSummary> {
        self.validate()?;

        let summary = RestoreSummary {
            walking_modes: self.walking_modes.len(),
            step_intervals: self.step_intervals.len(),
        };
        let Backup {
            walking_modes,
            step_intervals,
            settings: restored_settings,
            ..
        } = self;

        db.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM step_intervals", [])?;
            tx.execute("DELETE FROM walking_modes", [])?;
            for mode in &walking_modes {
                insert_mode_row(&tx, mode)?;
            }
            for interval in &step_intervals {
                insert_interval_row(&tx, interval)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .context("Failed to restore backup into the database")?;

        settings.replace(restored_settings)?;
        info!(
            "Restored {} walking modes and {} step intervals",
            summary.walking_modes, summary.step_intervals
        );
        Ok(summary)
    }
}
