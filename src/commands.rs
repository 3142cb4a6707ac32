//! Command handlers behind the CLI. Each returns the text to print.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use log::info;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::activity::{
    local_midnight, ActivitySummary, BucketSpec, ChartBucket, DayReport, PropagationPolicy,
    MAX_CHART_BUCKETS,
};
use crate::backup::Backup;
use crate::counter::CounterState;
use crate::db::{ModeId, NewWalkingMode, WalkingMode};
use crate::settings::UserSettings;
use crate::tracking::{TrackingState, TrackingStatus};
use crate::units::{format_distance, format_energy, format_speed, EnergyUnit, UnitSystem};
use crate::AppState;

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}

fn local_time(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}

/// Explicit bounds win; otherwise the running measurement defines the start
/// and the live counter the end.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowArgs {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl WindowArgs {
    async fn start(&self, state: &AppState) -> Option<DateTime<Utc>> {
        match self.from {
            Some(from) => Some(from),
            None => state.tracking.window_start().await,
        }
    }
}

pub async fn summary(state: &AppState, window: WindowArgs, json: bool) -> Result<String> {
    let modes = state.mode_registry().await?;
    let summary = state
        .activity()
        .summary(window.start(state).await, window.to, state.valuation(&modes))
        .await?;

    if json {
        return to_json(&summary);
    }
    Ok(render_summary(&summary, &state.settings.get()))
}

fn render_summary(summary: &ActivitySummary, settings: &UserSettings) -> String {
    let offset = settings.utc_offset().unwrap_or_else(|| Utc.fix());
    let mut out = String::new();
    let _ = writeln!(out, "Steps:     {}", summary.total_steps);
    let _ = writeln!(
        out,
        "Distance:  {}",
        format_distance(summary.total_distance_m, settings.unit_system)
    );
    let _ = writeln!(
        out,
        "Calories:  {}",
        format_energy(summary.total_calories_kcal, settings.energy_unit)
    );
    match (summary.window_start, summary.window_end) {
        (Some(start), Some(end)) => {
            let _ = writeln!(
                out,
                "Window:    {} to {}",
                local_time(start, offset),
                local_time(end, offset)
            );
        }
        _ => {
            let _ = writeln!(out, "Window:    none (no measurement running)");
        }
    }
    out
}

pub async fn chart(
    state: &AppState,
    window: WindowArgs,
    bucket_minutes: Option<u32>,
    json: bool,
) -> Result<String> {
    let settings = state.settings.get();
    let minutes = bucket_minutes.unwrap_or(settings.chart_bucket_minutes);
    if minutes == 0 {
        bail!("bucket width must be at least one minute");
    }
    let spec = BucketSpec {
        width: Duration::minutes(i64::from(minutes)),
        offset: state.settings.offset(),
    };

    let start = window.start(state).await;
    if let Some(start) = start {
        let count = spec.bucket_count(start, window.to.unwrap_or_else(Utc::now));
        if count > MAX_CHART_BUCKETS {
            bail!(
                "chart would need {count} buckets (limit {MAX_CHART_BUCKETS}); \
                 narrow the window or use wider buckets"
            );
        }
    }

    let modes = state.mode_registry().await?;
    let buckets = state
        .activity()
        .chart(start, window.to, &spec, state.valuation(&modes))
        .await?;

    if json {
        return to_json(&buckets);
    }
    if buckets.is_empty() {
        return Ok("No measurement running.\n".to_string());
    }
    Ok(render_chart(&buckets, &settings))
}

fn render_chart(buckets: &[ChartBucket], settings: &UserSettings) -> String {
    let mut out = String::new();
    for bucket in buckets {
        let _ = match bucket.totals {
            Some(totals) => writeln!(
                out,
                "{}  {:>7} steps  {:>10}  {:>12}",
                bucket.label,
                totals.steps,
                format_distance(totals.distance_m, settings.unit_system).to_string(),
                format_energy(totals.calories_kcal, settings.energy_unit).to_string()
            ),
            None => writeln!(out, "{}        -", bucket.label),
        };
    }
    out
}

pub async fn day(state: &AppState, date: Option<NaiveDate>, json: bool) -> Result<String> {
    let settings = state.settings.get();
    let offset = state.settings.offset();
    let now = Utc::now();
    let date = date.unwrap_or_else(|| now.with_timezone(&offset).date_naive());

    let modes = state.mode_registry().await?;
    let report = state
        .activity()
        .day_report(date, offset, now, settings.daily_step_goal, state.valuation(&modes))
        .await?;

    if json {
        return to_json(&report);
    }
    Ok(render_day(&report, &settings))
}

fn render_day(report: &DayReport, settings: &UserSettings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", report.title);
    out.push_str(&render_summary(&report.summary, settings));
    let _ = writeln!(
        out,
        "Goal:      {:.0}% of {} steps",
        report.goal_progress * 100.0,
        report.daily_goal
    );
    out.push('\n');
    out.push_str(&render_chart(&report.chart, settings));
    let _ = writeln!(
        out,
        "\n{}previous day  |  {}next day",
        if report.has_predecessor { "<- " } else { "   " },
        if report.has_successor { "-> " } else { "   " },
    );
    out
}

pub async fn start(state: &AppState) -> Result<String> {
    let flush = state.flush.lock().await;
    let measurement = state.tracking.start(&flush).await?;
    Ok(format!(
        "Measurement started at {}\n",
        local_time(measurement.started_at, state.settings.offset())
    ))
}

pub async fn stop(state: &AppState) -> Result<String> {
    let start = state.tracking.window_start().await;
    let modes = state.mode_registry().await?;
    // Settle the final count before the window closes.
    state.flush.lock().await.flush_now().await?;
    let measurement = state.tracking.stop().await?;

    let summary = state
        .activity()
        .summary(start, measurement.stopped_at, state.valuation(&modes))
        .await?;

    let mut out = String::from("Measurement stopped.\n");
    out.push_str(&render_summary(&summary, &state.settings.get()));
    Ok(out)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub tracking: TrackingState,
    pub active_mode: Option<WalkingMode>,
    pub counter: Option<CounterState>,
    pub today: ActivitySummary,
}

pub async fn status(state: &AppState, json: bool) -> Result<String> {
    let offset = state.settings.offset();
    let now = Utc::now();
    let today_start = local_midnight(now.with_timezone(&offset).date_naive(), offset);
    let modes = state.mode_registry().await?;

    let report = StatusReport {
        tracking: state.tracking.get_state().await,
        active_mode: state.db.get_active_walking_mode().await?,
        counter: state.counter.state().await,
        today: state
            .activity()
            .summary(Some(today_start), None, state.valuation(&modes))
            .await?,
    };

    if json {
        return to_json(&report);
    }

    let settings = state.settings.get();
    let mut out = String::new();
    let _ = match (report.tracking.status, report.tracking.started_at) {
        (TrackingStatus::Tracking, Some(started_at)) => writeln!(
            out,
            "Measuring since {}",
            local_time(started_at, offset)
        ),
        (TrackingStatus::AwaitingFlush, _) => writeln!(out, "Measurement starting"),
        _ => writeln!(out, "Not measuring"),
    };
    if let Some(mode) = &report.active_mode {
        let _ = writeln!(
            out,
            "Mode:      {} ({})",
            mode.name,
            format_speed(mode.speed_mps(), settings.unit_system)
        );
    }
    if let Some(counter) = &report.counter {
        let _ = writeln!(out, "Unsaved:   {} steps", counter.steps_since_last_save);
    }
    let _ = writeln!(out, "Today:");
    out.push_str(&render_summary(&report.today, &settings));
    Ok(out)
}

pub async fn list_modes(state: &AppState, include_deleted: bool, json: bool) -> Result<String> {
    let modes = state.db.list_walking_modes(!include_deleted).await?;
    if json {
        return to_json(&modes);
    }

    let settings = state.settings.get();
    let mut out = String::new();
    for mode in &modes {
        let _ = writeln!(
            out,
            "{}{:>3}  {:<16} {:.2} m/step  {}  factor {:.3}{}",
            if mode.is_active { "*" } else { " " },
            mode.id,
            mode.name,
            mode.step_length_m,
            format_speed(mode.speed_mps(), settings.unit_system),
            mode.calorie_factor,
            if mode.deleted_at.is_some() { "  (deleted)" } else { "" }
        );
    }
    Ok(out)
}

pub async fn add_mode(state: &AppState, mode: NewWalkingMode) -> Result<String> {
    let created = state.db.create_walking_mode(mode).await?;
    info!("Created walking mode {} '{}'", created.id, created.name);
    Ok(format!("Created walking mode {} '{}'\n", created.id, created.name))
}

/// Change a mode's profile. Refused once intervals reference the mode.
pub async fn update_mode(state: &AppState, mode_id: ModeId, mode: NewWalkingMode) -> Result<String> {
    let updated = state.db.update_walking_mode(mode_id, mode).await?;
    Ok(format!("Updated walking mode {} '{}'\n", updated.id, updated.name))
}

/// Make `mode_id` active. A running counter first saves its pending steps
/// under the previous mode.
/// Activates `mode_id` in the database, then on the live counter. If the
/// counter cannot switch, the previously active mode is restored so both
/// sides agree.
pub async fn activate_mode(state: &AppState, mode_id: ModeId) -> Result<String> {
    let previous = state.db.get_active_walking_mode().await?.map(|mode| mode.id);
    let mode = state.db.set_active_walking_mode(mode_id).await?;

    if state.counter.is_active().await {
        if let Err(err) = state.flush.lock().await.switch_mode(mode_id).await {
            if let Some(previous) = previous.filter(|previous| *previous != mode_id) {
                if let Err(restore_err) = state.db.set_active_walking_mode(previous).await {
                    log::error!("Failed to restore active walking mode {previous}: {restore_err:#}");
                }
            }
            return Err(err);
        }
    }
    Ok(format!("Active walking mode: {}\n", mode.name))
}

pub async fn remove_mode(state: &AppState, mode_id: ModeId) -> Result<String> {
    state.db.soft_delete_walking_mode(mode_id).await?;
    Ok(format!("Removed walking mode {mode_id}\n"))
}

pub async fn export(state: &AppState, path: &Path) -> Result<String> {
    let backup = Backup::collect(&state.db, &state.settings).await?;
    backup.write_to(path)?;
    Ok(format!(
        "Exported {} walking modes and {} step intervals to {}\n",
        backup.walking_modes.len(),
        backup.step_intervals.len(),
        path.display()
    ))
}

pub async fn import(state: &AppState, path: &Path) -> Result<String> {
    if state.counter.is_active().await {
        bail!("stop tracking before importing a backup");
    }
    let summary = Backup::read_from(path)?
        .restore(&state.db, &state.settings)
        .await?;
    Ok(format!(
        "Restored {} walking modes and {} step intervals\n",
        summary.walking_modes, summary.step_intervals
    ))
}

/// Fields to change; `None` leaves a setting as it is.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub body_weight_kg: Option<f64>,
    pub unit_system: Option<UnitSystem>,
    pub energy_unit: Option<EnergyUnit>,
    pub daily_step_goal: Option<u64>,
    pub default_mode_id: Option<ModeId>,
    pub propagation_policy: Option<PropagationPolicy>,
    pub flush_interval_secs: Option<u64>,
    pub chart_bucket_minutes: Option<u32>,
    pub utc_offset_minutes: Option<i32>,
}

pub fn show_settings(state: &AppState) -> Result<String> {
    to_json(&state.settings.get())
}

pub fn update_settings(state: &AppState, patch: SettingsPatch) -> Result<String> {
    let updated = state.settings.update(|settings| {
        if let Some(value) = patch.body_weight_kg {
            settings.body_weight_kg = value;
        }
        if let Some(value) = patch.unit_system {
            settings.unit_system = value;
        }
        if let Some(value) = patch.energy_unit {
            settings.energy_unit = value;
        }
        if let Some(value) = patch.daily_step_goal {
            settings.daily_step_goal = value;
        }
        if let Some(value) = patch.default_mode_id {
            settings.default_mode_id = Some(value);
        }
        if let Some(value) = patch.propagation_policy {
            settings.propagation_policy = value;
        }
        if let Some(value) = patch.flush_interval_secs {
            settings.flush_interval_secs = value;
        }
        if let Some(value) = patch.chart_bucket_minutes {
            settings.chart_bucket_minutes = value;
        }
        if let Some(value) = patch.utc_offset_minutes {
            settings.utc_offset_minutes = value;
        }
    })?;
    to_json(&updated)
}

/// One line of `track` input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackInput {
    Steps(u64),
    Mode(ModeId),
    Flush,
    Start,
    Stop,
    Summary,
    Status,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_track_input(line: &str) -> TrackInput {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return TrackInput::Empty;
    };
    let argument = words.next();

    if let Ok(steps) = first.parse::<u64>() {
        return TrackInput::Steps(steps);
    }

    match (first.to_ascii_lowercase().as_str(), argument) {
        ("steps" | "s", Some(n)) => n
            .parse()
            .map(TrackInput::Steps)
            .unwrap_or_else(|_| TrackInput::Unknown(line.trim().to_string())),
        ("mode" | "m", Some(id)) => id
            .parse()
            .map(|id| TrackInput::Mode(ModeId(id)))
            .unwrap_or_else(|_| TrackInput::Unknown(line.trim().to_string())),
        ("flush", None) => TrackInput::Flush,
        ("start", None) => TrackInput::Start,
        ("stop", None) => TrackInput::Stop,
        ("summary", None) => TrackInput::Summary,
        ("status", None) => TrackInput::Status,
        ("quit" | "exit" | "q", None) => TrackInput::Quit,
        _ => TrackInput::Unknown(line.trim().to_string()),
    }
}

const TRACK_HELP: &str = "Enter a step count, `mode <id>`, `flush`, `start`, `stop`, `summary`, `status` or `quit`.";

/// Interactive counting session: step counts arrive on `input`, the flush
/// worker persists them in the background, and the final count is saved on
/// exit.
pub async fn track<R, W>(state: &AppState, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let active_mode = state.db.get_active_walking_mode().await?;
    // New rows must not start before what is already stored.
    let started_at = match state.db.last_step_interval_end().await? {
        Some(last_end) if last_end > Utc::now() => {
            log::warn!("Clock is behind the last saved interval ({last_end}); counting from there");
            last_end
        }
        _ => Utc::now(),
    };
    state
        .counter
        .activate(started_at, active_mode.as_ref().map(|mode| mode.id), None)
        .await?;

    let period = std::time::Duration::from_secs(state.settings.flush_interval_secs());
    if let Err(err) = state.flush.lock().await.start(period) {
        state.counter.deactivate().await;
        return Err(err);
    }

    writeln!(out, "{TRACK_HELP}")?;
    let session = track_session(state, input, out).await;

    let shutdown = state.flush.lock().await.stop().await;
    if let Some(left) = state.counter.deactivate().await {
        if left.steps_since_last_save > 0 {
            log::warn!(
                "{} steps were not saved when tracking ended",
                left.steps_since_last_save
            );
        }
    }

    session.and(shutdown)
}

async fn track_session<R, W>(state: &AppState, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = parse_track_input(&line);
        if command == TrackInput::Quit {
            break;
        }
        match handle_track_input(state, command).await {
            Ok(text) => write!(out, "{text}")?,
            Err(err) => writeln!(out, "error: {err:#}")?,
        }
        out.flush()?;
    }
    Ok(())
}

async fn handle_track_input(state: &AppState, command: TrackInput) -> Result<String> {
    match command {
        TrackInput::Steps(steps) => {
            let pending = state.counter.record_steps(steps).await?;
            Ok(format!("+{steps} ({pending} unsaved)\n"))
        }
        TrackInput::Mode(mode_id) => activate_mode(state, mode_id).await,
        TrackInput::Flush => match state.flush.lock().await.flush_now().await? {
            Some(report) if report.wrote_row() => {
                Ok(format!("Saved {} steps\n", report.interval.step_count))
            }
            _ => Ok("Nothing to save\n".to_string()),
        },
        TrackInput::Start => start(state).await,
        TrackInput::Stop => stop(state).await,
        TrackInput::Summary => summary(state, WindowArgs::default(), false).await,
        TrackInput::Status => status(state, false).await,
        TrackInput::Empty => Ok(String::new()),
        TrackInput::Unknown(text) => Ok(format!("Unrecognised input '{text}'. {TRACK_HELP}\n")),
        TrackInput::Quit => Ok(String::new()),
    }
}
