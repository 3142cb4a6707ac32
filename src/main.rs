//! pacelog: step tracking from the command line.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use pacelog::activity::PropagationPolicy;
use pacelog::commands::{self, SettingsPatch, WindowArgs};
use pacelog::db::{ModeId, NewWalkingMode};
use pacelog::units::{EnergyUnit, UnitSystem};
use pacelog::{default_data_dir, utils::logging, AppState};

#[derive(Parser)]
#[command(name = "pacelog")]
#[command(about = "Step tracking with walking-mode aware distance and calorie summaries")]
#[command(version)]
struct Cli {
    /// Directory holding the database and settings (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Totals for the running measurement, or an explicit window
    Summary {
        #[command(flatten)]
        window: WindowOpts,

        #[arg(long)]
        json: bool,
    },

    /// Cumulative totals per time bucket
    Chart {
        #[command(flatten)]
        window: WindowOpts,

        /// Bucket width in minutes (defaults to the configured width)
        #[arg(long)]
        bucket_minutes: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Summary and hourly chart for one day
    Day {
        /// Day as YYYY-MM-DD in the configured offset (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        json: bool,
    },

    /// Start a distance measurement
    Start,

    /// Stop the running measurement and print its totals
    Stop,

    /// Measurement state, active mode and today's totals
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Manage walking modes
    Modes {
        #[command(subcommand)]
        command: ModeCommands,
    },

    /// Count steps interactively; counts are read from stdin and flushed in the background
    Track,

    /// Write a JSON backup of modes, step history and settings
    Export { path: PathBuf },

    /// Replace modes, step history and settings with a JSON backup
    Import { path: PathBuf },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        command: Option<SettingsCommands>,
    },
}

#[derive(clap::Args)]
struct WindowOpts {
    /// Window start, RFC 3339 (default: start of the running measurement)
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// Window end, RFC 3339 (default: now, including unsaved steps)
    #[arg(long)]
    to: Option<DateTime<Utc>>,
}

impl From<WindowOpts> for WindowArgs {
    fn from(opts: WindowOpts) -> Self {
        WindowArgs {
            from: opts.from,
            to: opts.to,
        }
    }
}

#[derive(Subcommand)]
enum ModeCommands {
    /// List walking modes; `*` marks the active one
    List {
        /// Include deleted modes
        #[arg(long)]
        all: bool,

        #[arg(long)]
        json: bool,
    },
    /// Create a walking mode
    Add {
        name: String,

        /// Metres per step
        #[arg(long)]
        step_length: f64,

        /// Steps per second
        #[arg(long, default_value = "1.8")]
        frequency: f64,

        /// kcal per kg body weight per km
        #[arg(long, default_value = "0.708")]
        calorie_factor: f64,
    },
    /// Change a mode that no recorded step uses yet
    Update {
        id: i64,

        name: String,

        #[arg(long)]
        step_length: f64,

        #[arg(long)]
        frequency: f64,

        #[arg(long)]
        calorie_factor: f64,
    },
    /// Make a mode the active one
    Activate { id: i64 },
    /// Delete a mode; history recorded with it keeps its values
    Remove { id: i64 },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the current settings
    Show,
    /// Change one or more settings
    Set {
        #[arg(long)]
        weight: Option<f64>,

        #[arg(long, value_parser = ["metric", "imperial"])]
        units: Option<String>,

        #[arg(long, value_parser = ["kcal", "kj"])]
        energy: Option<String>,

        #[arg(long)]
        goal: Option<u64>,

        #[arg(long)]
        default_mode: Option<i64>,

        /// Which neighbour an interval without a mode takes its mode from
        #[arg(long, value_parser = ["backward", "forward", "disabled"])]
        propagation: Option<String>,

        #[arg(long)]
        flush_interval_secs: Option<u64>,

        #[arg(long)]
        bucket_minutes: Option<u32>,

        /// Local offset east of UTC in minutes
        #[arg(long, allow_hyphen_values = true)]
        utc_offset_minutes: Option<i32>,
    },
}

fn settings_patch(command: SettingsCommands) -> Result<Option<SettingsPatch>> {
    let SettingsCommands::Set {
        weight,
        units,
        energy,
        goal,
        default_mode,
        propagation,
        flush_interval_secs,
        bucket_minutes,
        utc_offset_minutes,
    } = command
    else {
        return Ok(None);
    };

    let unit_system = units
        .map(|value| match value.as_str() {
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            other => Err(anyhow!("unknown unit system '{other}'")),
        })
        .transpose()?;
    let energy_unit = energy
        .map(|value| match value.as_str() {
            "kcal" => Ok(EnergyUnit::Kilocalories),
            "kj" => Ok(EnergyUnit::Kilojoules),
            other => Err(anyhow!("unknown energy unit '{other}'")),
        })
        .transpose()?;
    let propagation_policy = propagation
        .map(|value| match value.as_str() {
            "backward" => Ok(PropagationPolicy::Backward),
            "forward" => Ok(PropagationPolicy::Forward),
            "disabled" => Ok(PropagationPolicy::Disabled),
            other => Err(anyhow!("unknown propagation policy '{other}'")),
        })
        .transpose()?;

    Ok(Some(SettingsPatch {
        body_weight_kg: weight,
        unit_system,
        energy_unit,
        daily_step_goal: goal,
        default_mode_id: default_mode.map(ModeId),
        propagation_policy,
        flush_interval_secs,
        chart_bucket_minutes: bucket_minutes,
        utc_offset_minutes,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let verbose = logging::debug_env_enabled();
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();
    logging::set_verbose(verbose);

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let state = AppState::open(&data_dir).await?;

    let output = match cli.command {
        Commands::Summary { window, json } => commands::summary(&state, window.into(), json).await?,
        Commands::Chart {
            window,
            bucket_minutes,
            json,
        } => commands::chart(&state, window.into(), bucket_minutes, json).await?,
        Commands::Day { date, json } => commands::day(&state, date, json).await?,
        Commands::Start => commands::start(&state).await?,
        Commands::Stop => commands::stop(&state).await?,
        Commands::Status { json } => commands::status(&state, json).await?,
        Commands::Modes { command } => match command {
            ModeCommands::List { all, json } => commands::list_modes(&state, all, json).await?,
            ModeCommands::Add {
                name,
                step_length,
                frequency,
                calorie_factor,
            } => {
                commands::add_mode(
                    &state,
                    NewWalkingMode {
                        name,
                        step_length_m: step_length,
                        step_frequency_hz: frequency,
                        calorie_factor,
                    },
                )
                .await?
            }
            ModeCommands::Update {
                id,
                name,
                step_length,
                frequency,
                calorie_factor,
            } => {
                commands::update_mode(
                    &state,
                    ModeId(id),
                    NewWalkingMode {
                        name,
                        step_length_m: step_length,
                        step_frequency_hz: frequency,
                        calorie_factor,
                    },
                )
                .await?
            }
            ModeCommands::Activate { id } => commands::activate_mode(&state, ModeId(id)).await?,
            ModeCommands::Remove { id } => commands::remove_mode(&state, ModeId(id)).await?,
        },
        Commands::Track => {
            let stdin = BufReader::new(tokio::io::stdin());
            commands::track(&state, stdin, &mut std::io::stdout()).await?;
            String::new()
        }
        Commands::Export { path } => commands::export(&state, &path).await?,
        Commands::Import { path } => commands::import(&state, &path).await?,
        Commands::Settings { command } => match command.map(settings_patch).transpose()?.flatten() {
            Some(patch) => commands::update_settings(&state, patch)?,
            None => commands::show_settings(&state)?,
        },
    };

    print!("{output}");
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
    Ok(())
}
