use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;

use crate::db::{ModeId, WalkingMode};
use crate::error::{ActivityError, ActivityResult};

pub trait ModeRegistry {
    fn mode(&self, id: ModeId) -> ActivityResult<&WalkingMode>;

    fn default_mode(&self) -> &WalkingMode;

    /// Mode to price an interval with. Unset and unregistered ids fall back
    /// to the default mode; the latter is logged.
    fn resolve(&self, id: Option<ModeId>) -> &WalkingMode {
        match id {
            None => self.default_mode(),
            Some(id) => match self.mode(id) {
                Ok(mode) => mode,
                Err(err) => {
                    warn!("{err}; using default mode '{}'", self.default_mode().name);
                    self.default_mode()
                }
            },
        }
    }
}

/// Point-in-time copy of the stored walking modes.
#[derive(Debug, Clone)]
pub struct WalkingModeRegistry {
    modes: HashMap<ModeId, WalkingMode>,
    default_mode: WalkingMode,
}

impl WalkingModeRegistry {
    /// `preferred_default` wins when registered; otherwise the active mode,
    /// otherwise a built-in walking profile.
    pub fn new(modes: Vec<WalkingMode>, preferred_default: Option<ModeId>) -> Self {
        let modes: HashMap<ModeId, WalkingMode> =
            modes.into_iter().map(|mode| (mode.id, mode)).collect();

        let default_mode = preferred_default
            .and_then(|id| modes.get(&id))
            .or_else(|| {
                modes
                    .values()
                    .filter(|mode| mode.is_active && mode.deleted_at.is_none())
                    .min_by_key(|mode| mode.id)
            })
            .cloned()
            .unwrap_or_else(builtin_walking_mode);

        Self {
            modes,
            default_mode,
        }
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

impl ModeRegistry for WalkingModeRegistry {
    fn mode(&self, id: ModeId) -> ActivityResult<&WalkingMode> {
        self.modes.get(&id).ok_or(ActivityError::UnknownMode(id))
    }

    fn default_mode(&self) -> &WalkingMode {
        &self.default_mode
    }
}

/// Walking profile used when the database holds no usable mode.
pub fn builtin_walking_mode() -> WalkingMode {
    let epoch = DateTime::<Utc>::UNIX_EPOCH;
    WalkingMode {
        id: ModeId(0),
        name: "Walking".into(),
        step_length_m: 0.7,
        step_frequency_hz: 1.8,
        calorie_factor: 0.708,
        is_active: false,
        created_at: epoch,
        updated_at: epoch,
        deleted_at: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mode(id: i64, name: &str, step_length_m: f64, active: bool) -> WalkingMode {
        WalkingMode {
            id: ModeId(id),
            name: name.into(),
            step_length_m,
            step_frequency_hz: 2.0,
            calorie_factor: 1.0,
            is_active: active,
            ..builtin_walking_mode()
        }
    }

    #[test]
    fn preferred_default_wins_over_active_mode() {
        let registry = WalkingModeRegistry::new(
            vec![mode(1, "Walking", 0.7, true), mode(2, "Running", 1.2, false)],
            Some(ModeId(2)),
        );
        assert_eq!(registry.default_mode().name, "Running");
    }

    #[test]
    fn active_mode_is_default_when_preference_missing() {
        let registry = WalkingModeRegistry::new(
            vec![mode(1, "Walking", 0.7, false), mode(2, "Running", 1.2, true)],
            Some(ModeId(99)),
        );
        assert_eq!(registry.default_mode().id, ModeId(2));
    }

    #[test]
    fn unknown_mode_resolves_to_default() {
        let registry = WalkingModeRegistry::new(vec![mode(1, "Walking", 0.7, true)], None);

        assert!(matches!(
            registry.mode(ModeId(7)),
            Err(ActivityError::UnknownMode(ModeId(7)))
        ));
        assert_eq!(registry.resolve(Some(ModeId(7))).id, ModeId(1));
        assert_eq!(registry.resolve(None).id, ModeId(1));
    }

    #[test]
    fn empty_registry_uses_builtin_profile() {
        let registry = WalkingModeRegistry::new(Vec::new(), None);
        assert!(registry.is_empty());
        assert_eq!(registry.default_mode().step_length_m, 0.7);
    }
}
