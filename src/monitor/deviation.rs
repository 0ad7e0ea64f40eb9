//! Route deviation detection
//!
//! Nearest-waypoint check against the expected route. Waypoints come from
//! the directions service geometry and are dense enough that the minimum
//! point distance stands in for a true polyline projection.

use crate::config::MonitoringConfig;
use crate::geo::{haversine_distance, Position};
use serde::{Deserialize, Serialize};

/// Ordered waypoints the user is expected to follow
///
/// Read-only once a trip starts; a new route fetch replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedRoute {
    waypoints: Vec<Position>,
}

impl ExpectedRoute {
    pub fn new(waypoints: Vec<Position>) -> Self {
        Self { waypoints }
    }

    /// A route with no waypoints; deviation detection stays inactive
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn waypoints(&self) -> &[Position] {
        &self.waypoints
    }

    /// Distance in metres from `position` to the closest waypoint
    pub fn nearest_distance(&self, position: &Position) -> Option<f64> {
        self.waypoints
            .iter()
            .map(|w| haversine_distance(w, position))
            .fold(None, |min, d| match min {
                Some(m) if m <= d => Some(m),
                _ => Some(d),
            })
    }
}

impl From<Vec<Position>> for ExpectedRoute {
    fn from(waypoints: Vec<Position>) -> Self {
        Self::new(waypoints)
    }
}

/// Whether the latest position is on the expected route
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteStatus {
    OnRoute,
    OffRoute { distance_m: f64 },
}

impl RouteStatus {
    pub fn is_off_route(&self) -> bool {
        matches!(self, RouteStatus::OffRoute { .. })
    }
}

/// Compares positions against an [`ExpectedRoute`]
#[derive(Debug, Clone, Copy)]
pub struct RouteDeviationDetector {
    threshold_m: f64,
}

impl RouteDeviationDetector {
    pub fn new(threshold_m: f64) -> Self {
        Self { threshold_m }
    }

    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self::new(config.deviation_threshold_m)
    }

    /// Check `position` against `route`
    ///
    /// Returns `None` when the route is empty. A distance exactly at the
    /// threshold counts as on route.
    pub fn check(&self, route: &ExpectedRoute, position: &Position) -> Option<RouteStatus> {
        let distance_m = route.nearest_distance(position)?;
        if distance_m <= self.threshold_m {
            Some(RouteStatus::OnRoute)
        } else {
            Some(RouteStatus::OffRoute { distance_m })
        }
    }
}
