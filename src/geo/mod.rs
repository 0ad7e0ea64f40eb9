//! Positions, distances and the position-provider seam
//!
//! Everything that touches coordinates goes through [`Position`]. The
//! platform location service is abstracted behind [`PositionProvider`] so
//! the trip machine can be driven by real hardware, a scripted replay or a
//! test double.

pub mod sampler;

pub use sampler::{GeoSampler, PositionSample};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mean Earth radius used for great-circle distances, in metres
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// When the fix was taken
    pub timestamp: DateTime<Utc>,
}

/// Google Maps link for a coordinate pair
pub fn maps_link(latitude: f64, longitude: f64) -> String {
    format!("https://maps.google.com/?q={},{}", latitude, longitude)
}

impl Position {
    /// Creates a position stamped with the current time
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self::at(latitude, longitude, Utc::now())
    }

    /// Creates a position with an explicit timestamp
    pub fn at(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Cheap L1 displacement in degrees (|dlat| + |dlon|)
    ///
    /// Not metric; only meaningful for comparing against a small epsilon at
    /// GPS-jitter scale.
    pub fn l1_displacement(&self, other: &Position) -> f64 {
        (self.latitude - other.latitude).abs() + (self.longitude - other.longitude).abs()
    }

    /// Great-circle distance to another position in metres
    pub fn distance_to(&self, other: &Position) -> f64 {
        haversine_distance(self, other)
    }
}

/// Haversine great-circle distance between two positions, in metres
pub fn haversine_distance(p1: &Position, p2: &Position) -> f64 {
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lon = (p2.longitude - p1.longitude).to_radians();
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + (d_lon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Result of asking the platform for location permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Failure to obtain a position fix
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Location fix timed out after {0} seconds")]
    Timeout(u64),
}

/// Platform location service
pub trait PositionProvider: Send + Sync {
    /// Acquire a fresh position fix
    fn current_position(&self) -> BoxFuture<'_, Result<Position, AcquisitionError>>;

    /// Ask the user for location permission
    fn request_permission(&self) -> BoxFuture<'_, PermissionStatus>;
}

/// Acquire one position, bounded by `timeout`
pub async fn acquire_position(
    provider: &dyn PositionProvider,
    timeout: Duration,
) -> Result<Position, AcquisitionError> {
    match tokio::time::timeout(timeout, provider.current_position()).await {
        Ok(result) => result,
        Err(_) => Err(AcquisitionError::Timeout(timeout.as_secs())),
    }
}
