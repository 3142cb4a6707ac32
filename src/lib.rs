pub mod activity;
pub mod backup;
pub mod commands;
pub mod counter;
pub mod db;
pub mod error;
pub mod persistence;
pub mod settings;
pub mod tracking;
pub mod units;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use tokio::sync::Mutex;

use activity::{ActivityService, PropagationPolicy, Valuation, WalkingModeRegistry};
use counter::StepCounter;
use db::Database;
use persistence::FlushController;
use settings::SettingsStore;
use tracking::TrackingController;

pub const DATABASE_FILE: &str = "pacelog.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// Everything a command needs, opened once per process.
pub struct AppState {
    pub db: Database,
    pub settings: SettingsStore,
    pub counter: StepCounter,
    pub flush: Mutex<FlushController>,
    pub tracking: TrackingController,
}

impl AppState {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!("failed to create data directory {}", data_dir.display())
        })?;

        let database = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = SettingsStore::new(
            data_dir.join(SETTINGS_FILE),
            utils::logging::debug_env_enabled(),
        )?;
        let tracking = TrackingController::restore(database.clone()).await?;

        let counter = StepCounter::new();
        let flush = FlushController::new(counter.clone(), Arc::new(database.clone()));

        Ok(Self {
            db: database,
            settings,
            counter,
            flush: Mutex::new(flush),
            tracking,
        })
    }

    /// All modes, deleted ones included so history stays priceable.
    pub async fn mode_registry(&self) -> Result<WalkingModeRegistry> {
        let modes = self.db.list_walking_modes(false).await?;
        Ok(WalkingModeRegistry::new(
            modes,
            self.settings.get().default_mode_id,
        ))
    }

    pub fn activity(&self) -> ActivityService<Database, StepCounter> {
        ActivityService::new(self.db.clone(), self.counter.clone(), self.policy())
    }

    pub fn policy(&self) -> PropagationPolicy {
        self.settings.get().propagation_policy
    }

    pub fn valuation<'a>(&self, modes: &'a WalkingModeRegistry) -> Valuation<'a, WalkingModeRegistry> {
        Valuation {
            modes,
            body_weight_kg: self.settings.get().body_weight_kg,
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/pacelog` on Linux.
pub fn default_data_dir() -> Result<PathBuf> {
    ProjectDirs::from("org", "pacelog", "pacelog")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("could not determine a home directory for pacelog data"))
}
