use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::LiveSnapshot;
use crate::db::{ModeId, StepInterval};

/// Steps counted since the last save, plus the save cursor they started at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CounterState {
    pub steps_since_last_save: u64,
    pub active_mode: Option<ModeId>,
    pub started_at: DateTime<Utc>,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub flush_generation: u64,
    /// Everything recorded this session, saved or not.
    pub session_steps: u64,
}

impl CounterState {
    pub fn new(
        started_at: DateTime<Utc>,
        active_mode: Option<ModeId>,
        last_saved_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            steps_since_last_save: 0,
            active_mode,
            started_at: started_at.trunc_subsecs(3),
            last_saved_at: last_saved_at.map(|at| at.trunc_subsecs(3)),
            flush_generation: 0,
            session_steps: 0,
        }
    }

    pub fn record(&mut self, steps: u64) {
        self.steps_since_last_save = self.steps_since_last_save.saturating_add(steps);
        self.session_steps = self.session_steps.saturating_add(steps);
    }

    /// Where the next flushed interval starts.
    pub fn save_cursor(&self) -> DateTime<Utc> {
        self.last_saved_at.unwrap_or(self.started_at)
    }

    pub fn snapshot(&self, sampled_at: DateTime<Utc>) -> LiveSnapshot {
        LiveSnapshot {
            steps_since_last_save: self.steps_since_last_save,
            active_mode: self.active_mode,
            sampled_at,
            last_saved_at: self.last_saved_at,
            flush_generation: self.flush_generation,
        }
    }

    /// The unsaved steps as the interval a flush at `at` would write.
    pub fn pending_interval(&self, at: DateTime<Utc>) -> StepInterval {
        StepInterval::new(
            self.save_cursor().min(at),
            at,
            self.steps_since_last_save,
            self.active_mode,
        )
    }

    /// Called once the pending interval is durable.
    pub fn mark_saved(&mut self, at: DateTime<Utc>) {
        self.steps_since_last_save = 0;
        self.last_saved_at = Some(at);
        self.flush_generation += 1;
    }

    /// Move the cursor without a write; nothing was pending.
    pub fn advance_cursor(&mut self, at: DateTime<Utc>) {
        if self.save_cursor() < at {
            self.last_saved_at = Some(at);
        }
    }
}
