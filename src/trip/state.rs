//! Trip state, session data and orchestrator events
//!
//! The orchestrator consumes a single stream of [`TripEvent`]s. Commands
//! carry a oneshot reply; stream signals carry the epoch of the trip that
//! spawned them so anything still queued from a stopped trip is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::TripError;
use crate::countdown::CountdownState;
use crate::dispatch::DispatchReport;
use crate::geo::{Position, PositionSample};
use crate::monitor::{ExpectedRoute, RouteStatus, StillnessDetector};
use crate::trigger::AccelSample;

/// Trip guardian state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TripState {
    /// No trip and no SOS in progress
    #[default]
    Idle,
    /// Trip active, monitoring all sources
    Armed,
    /// SOS countdown running (or its dispatch in flight)
    CountingDown,
}

impl TripState {
    /// Returns a human-readable description of the state
    pub fn description(&self) -> &'static str {
        match self {
            TripState::Idle => "Not monitoring",
            TripState::Armed => "Monitoring trip",
            TripState::CountingDown => "Counting down to SOS",
        }
    }
}

/// How the expected route for a trip is obtained
#[derive(Debug, Clone, Default)]
pub enum RoutePlan {
    /// No route; deviation detection stays inactive
    #[default]
    None,
    /// Use these waypoints as-is
    Fixed(ExpectedRoute),
    /// Ask the route provider for a route from the first fix to here
    To(Position),
}

/// The single active trip
#[derive(Debug, Clone)]
pub struct TripSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Stream epoch; events tagged with another epoch are stale
    pub epoch: u64,
    pub last_known_position: Position,
    pub stillness: StillnessDetector,
    pub expected_route: ExpectedRoute,
    pub route_status: Option<RouteStatus>,
    /// Read once at trip start
    pub contacts: Vec<String>,
}

impl TripSession {
    pub fn new(
        epoch: u64,
        initial: Position,
        mut stillness: StillnessDetector,
        expected_route: ExpectedRoute,
        contacts: Vec<String>,
    ) -> Self {
        stillness.seed(initial);
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            epoch,
            last_known_position: initial,
            stillness,
            expected_route,
            route_status: None,
            contacts,
        }
    }

    pub fn last_stable_position(&self) -> Option<&Position> {
        self.stillness.last_stable()
    }

    pub fn unchanged_duration_seconds(&self) -> u64 {
        self.stillness.unchanged_seconds()
    }
}

/// Snapshot published after every event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripStatus {
    pub state: TripState,
    pub trip_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub countdown: CountdownState,
    pub last_known_position: Option<Position>,
    pub last_stable_position: Option<Position>,
    pub unchanged_seconds: u64,
    pub route_status: Option<RouteStatus>,
    pub contact_count: usize,
    /// Outcome of the most recent dispatch, kept across trips
    pub last_dispatch: Option<DispatchReport>,
}

/// Everything the orchestrator reacts to
#[derive(Debug)]
pub enum TripEvent {
    StartTrip {
        plan: RoutePlan,
        reply: oneshot::Sender<Result<Uuid, TripError>>,
    },
    StopTrip {
        reply: oneshot::Sender<Result<(), TripError>>,
    },
    /// Reply is true if a countdown started, false if one was already running
    ManualSos {
        reply: oneshot::Sender<Result<bool, TripError>>,
    },
    /// Reply is true if a live countdown was cancelled
    CancelSos {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,

    PositionSampled {
        epoch: u64,
        sample: PositionSample,
    },
    Acceleration {
        epoch: u64,
        sample: AccelSample,
    },
    Utterance {
        epoch: u64,
        text: String,
    },
    SensorFault {
        epoch: u64,
        sensor: &'static str,
        message: String,
    },
    CountdownTick {
        generation: u64,
    },
    DispatchFinished {
        epoch: Option<u64>,
        trip_id: Option<Uuid>,
        report: DispatchReport,
    },
}
