//! `tripguard` command line
//!
//! ```text
//! tripguard replay <scenario.json> [--dry-run]
//! ```
//!
//! Replays a recorded scenario through the trip guardian in real time.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tripguard::config::{self, Config};
use tripguard::contacts::{ContactStore, JsonContactStore, StaticContacts};
use tripguard::database::AlertLog;
use tripguard::dispatch::{HttpGateway, NotificationGateway};
use tripguard::geo::Position;
use tripguard::local_alert::TracingAlertSink;
use tripguard::monitor::ExpectedRoute;
use tripguard::route::{OrsRouteProvider, RouteProvider};
use tripguard::simulate::{ChannelAccelerometer, ChannelSpeech, LoggingGateway, ScriptedPositions};
use tripguard::trigger::AccelSample;
use tripguard::{Collaborators, RoutePlan, TripGuardian};

/// A recorded trip
#[derive(Debug, Deserialize)]
struct Scenario {
    /// One entry per fix, `null` for a failed fix; the last entry repeats
    positions: Vec<Option<(f64, f64)>>,
    #[serde(default)]
    accelerometer: Vec<TimedSample>,
    #[serde(default)]
    utterances: Vec<TimedUtterance>,
    /// Overrides the contact store when present
    #[serde(default)]
    contacts: Option<Vec<String>>,
    /// Fixed waypoints as `[lat, lon]`
    #[serde(default)]
    route: Option<Vec<(f64, f64)>>,
    /// Ask the route provider for a route to here instead
    #[serde(default)]
    destination: Option<(f64, f64)>,
    #[serde(default)]
    manual_sos_at_secs: Option<u64>,
    #[serde(default)]
    cancel_at_secs: Option<u64>,
    #[serde(default = "default_duration")]
    duration_secs: u64,
}

fn default_duration() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
struct TimedSample {
    at_secs: u64,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Deserialize)]
struct TimedUtterance {
    at_secs: u64,
    text: String,
}

/// Something to do at a point in the replay
enum Action {
    Accel(AccelSample),
    Say(String),
    ManualSos,
    Cancel,
}

/// Personal-safety trip guardian
#[derive(Parser, Debug)]
#[command(name = "tripguard")]
#[command(version, about = "Trip monitoring with a cancellable SOS countdown")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded scenario through the trip guardian in real time
    Replay {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Log SOS messages instead of posting them to the gateway
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario {:?}", path))?;
    let scenario: Scenario = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse scenario {:?}", path))?;
    if scenario.positions.is_empty() {
        bail!("Scenario {:?} has no positions", path);
    }
    Ok(scenario)
}

fn timeline(scenario: &Scenario) -> Vec<(u64, Action)> {
    let mut actions: Vec<(u64, Action)> = scenario
        .accelerometer
        .iter()
        .map(|s| (s.at_secs, Action::Accel(AccelSample::new(s.x, s.y, s.z))))
        .chain(
            scenario
                .utterances
                .iter()
                .map(|u| (u.at_secs, Action::Say(u.text.clone()))),
        )
        .collect();
    if let Some(at) = scenario.manual_sos_at_secs {
        actions.push((at, Action::ManualSos));
    }
    if let Some(at) = scenario.cancel_at_secs {
        actions.push((at, Action::Cancel));
    }
    actions.sort_by_key(|(at, _)| *at);
    actions
}

fn route_plan(scenario: &Scenario) -> RoutePlan {
    if let Some(points) = &scenario.route {
        let waypoints = points
            .iter()
            .map(|&(lat, lon)| Position::new(lat, lon))
            .collect();
        RoutePlan::Fixed(ExpectedRoute::new(waypoints))
    } else if let Some((lat, lon)) = scenario.destination {
        RoutePlan::To(Position::new(lat, lon))
    } else {
        RoutePlan::None
    }
}

fn collaborators(
    config: &Config,
    scenario: &Scenario,
    dry_run: bool,
    accelerometer: Arc<ChannelAccelerometer>,
    speech: Arc<ChannelSpeech>,
) -> Result<Collaborators> {
    let gateway: Arc<dyn NotificationGateway> = if dry_run {
        tracing::info!("Dry run: SOS messages will only be logged");
        Arc::new(LoggingGateway)
    } else {
        Arc::new(HttpGateway::from_config(&config.gateway).context("Invalid gateway config")?)
    };

    let contacts: Arc<dyn ContactStore> = match &scenario.contacts {
        Some(list) => Arc::new(StaticContacts::new(list.iter().cloned())),
        None => Arc::new(JsonContactStore::open_default().context("Failed to open contacts")?),
    };

    let routes: Option<Arc<dyn RouteProvider>> = match OrsRouteProvider::from_config(&config.route)
    {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            tracing::info!("Route planning disabled: {}", e);
            None
        }
    };

    let history = if config.storage.alert_history {
        match AlertLog::open_default() {
            Ok(log) => Some(Arc::new(log)),
            Err(e) => {
                tracing::warn!("Alert history unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(Collaborators {
        positions: Arc::new(ScriptedPositions::new(scenario.positions.clone())),
        accelerometer,
        speech,
        gateway,
        alerts: Arc::new(TracingAlertSink),
        contacts,
        routes,
        history,
    })
}

async fn replay(scenario_path: PathBuf, dry_run: bool) -> Result<()> {
    let config = config::load_from(&config::get_config_path()).context("Failed to load config")?;
    let scenario = load_scenario(&scenario_path)?;

    let accelerometer = Arc::new(ChannelAccelerometer::new());
    let speech = Arc::new(ChannelSpeech::new());
    let collaborators = collaborators(
        &config,
        &scenario,
        dry_run,
        Arc::clone(&accelerometer),
        Arc::clone(&speech),
    )?;

    let guardian =
        TripGuardian::spawn(config, collaborators).context("Invalid trip configuration")?;
    let trip_id = guardian
        .start_trip(route_plan(&scenario))
        .await
        .context("Failed to start trip")?;
    tracing::info!("Replaying {:?} as trip {}", scenario_path, trip_id);

    let started = tokio::time::Instant::now();
    for (at, action) in timeline(&scenario) {
        tokio::time::sleep_until(started + Duration::from_secs(at)).await;
        match action {
            Action::Accel(sample) => {
                if !accelerometer.push(sample) {
                    tracing::debug!("Accelerometer sample at {}s dropped", at);
                }
            }
            Action::Say(text) => {
                if !speech.say(&text) {
                    tracing::debug!("Utterance at {}s dropped", at);
                }
            }
            Action::ManualSos => {
                guardian.manual_sos().await?;
            }
            Action::Cancel => {
                guardian.cancel_sos().await?;
            }
        }
    }

    tokio::time::sleep_until(started + Duration::from_secs(scenario.duration_secs)).await;

    let status = guardian.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    guardian.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tripguard::init_logging();

    match cli.command {
        Commands::Replay { scenario, dry_run } => replay(scenario, dry_run).await,
    }
}
