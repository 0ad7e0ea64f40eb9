//! Expected-route planning
//!
//! Fetches a driving route between two points from OpenRouteService and
//! turns it into an [`ExpectedRoute`] for deviation detection. Routing is
//! optional: [`plan_route`] degrades every failure to an empty route, which
//! leaves deviation detection inactive for the trip.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RouteConfig;
use crate::geo::Position;
use crate::monitor::ExpectedRoute;

/// Default timeout for a directions request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Route fetch errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("No routing API key configured")]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Routing service error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("No route found")]
    NoRoute,
}

/// Directions service
pub trait RouteProvider: Send + Sync {
    fn fetch_route<'a>(
        &'a self,
        origin: &'a Position,
        destination: &'a Position,
    ) -> BoxFuture<'a, Result<ExpectedRoute, RouteError>>;
}

/// Request body for the directions endpoint; coordinates are `[lon, lat]`
#[derive(Debug, Serialize)]
struct DirectionsRequest {
    coordinates: [[f64; 2]; 2],
}

/// GeoJSON directions response
#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<[f64; 2]>,
}

impl DirectionsResponse {
    fn into_route(self) -> Result<ExpectedRoute, RouteError> {
        let feature = self.features.into_iter().next().ok_or(RouteError::NoRoute)?;
        if feature.geometry.coordinates.is_empty() {
            return Err(RouteError::NoRoute);
        }

        let now = chrono::Utc::now();
        let waypoints = feature
            .geometry
            .coordinates
            .into_iter()
            .map(|[lon, lat]| Position::at(lat, lon, now))
            .collect();
        Ok(ExpectedRoute::new(waypoints))
    }
}

/// OpenRouteService directions client
#[derive(Debug, Clone)]
pub struct OrsRouteProvider {
    base_url: String,
    api_key: String,
    profile: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OrsRouteProvider {
    pub fn with_config(
        base_url: &str,
        api_key: &str,
        profile: &str,
        timeout_secs: u64,
    ) -> Result<Self, RouteError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouteError::Client(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            profile: profile.to_string(),
            client,
            timeout,
        })
    }

    /// Build a provider from config; fails without an API key
    pub fn from_config(config: &RouteConfig) -> Result<Self, RouteError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(RouteError::MissingApiKey)?;
        Self::with_config(&config.base_url, api_key, &config.profile, DEFAULT_TIMEOUT_SECS)
    }

    /// Directions endpoint URL
    pub fn directions_url(&self) -> String {
        format!("{}/v2/directions/{}/geojson", self.base_url, self.profile)
    }

    async fn request(&self, origin: &Position, destination: &Position) -> Result<ExpectedRoute, RouteError> {
        let body = DirectionsRequest {
            coordinates: [
                [origin.longitude, origin.latitude],
                [destination.longitude, destination.latitude],
            ],
        };

        let response = self
            .client
            .post(self.directions_url())
            .header("Authorization", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RouteError::Timeout(self.timeout.as_secs())
                } else {
                    RouteError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RouteError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: DirectionsResponse = response
            .json()
            .await
            .map_err(|e| RouteError::ParseError(e.to_string()))?;
        parsed.into_route()
    }
}

impl RouteProvider for OrsRouteProvider {
    fn fetch_route<'a>(
        &'a self,
        origin: &'a Position,
        destination: &'a Position,
    ) -> BoxFuture<'a, Result<ExpectedRoute, RouteError>> {
        Box::pin(self.request(origin, destination))
    }
}

/// Fetch a route, falling back to an empty one on any error
pub async fn plan_route(
    provider: &dyn RouteProvider,
    origin: &Position,
    destination: &Position,
) -> ExpectedRoute {
    match provider.fetch_route(origin, destination).await {
        Ok(route) => {
            tracing::info!("Planned route with {} waypoint(s)", route.len());
            route
        }
        Err(e) => {
            tracing::warn!("Route planning failed, deviation detection disabled: {}", e);
            ExpectedRoute::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRoutes;

    impl RouteProvider for FailingRoutes {
        fn fetch_route<'a>(
            &'a self,
            _origin: &'a Position,
            _destination: &'a Position,
        ) -> BoxFuture<'a, Result<ExpectedRoute, RouteError>> {
            Box::pin(async { Err(RouteError::NoRoute) })
        }
    }

    #[test]
    fn test_request_uses_lon_lat_order() {
        let body = DirectionsRequest {
            coordinates: [[77.2, 28.6], [77.3, 28.7]],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"coordinates": [[77.2, 28.6], [77.3, 28.7]]}));
    }

    #[test]
    fn test_response_maps_to_positions() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"summary": {"distance": 1200.0}},
                "geometry": {"type": "LineString", "coordinates": [[77.2, 28.6], [77.21, 28.61]]}
            }]
        }"#;
        let response: DirectionsResponse = serde_json::from_str(json).unwrap();
        let route = response.into_route().unwrap();

        assert_eq!(route.len(), 2);
        assert_eq!(route.waypoints()[0].latitude, 28.6);
        assert_eq!(route.waypoints()[0].longitude, 77.2);
        assert_eq!(route.waypoints()[1].latitude, 28.61);
    }

    #[test]
    fn test_empty_feature_collection_is_no_route() {
        let response: DirectionsResponse = serde_json::from_str(r#"{"features": []}"#).unwrap();
        assert_eq!(response.into_route().unwrap_err(), RouteError::NoRoute);
    }

    #[test]
    fn test_missing_api_key() {
        let config = RouteConfig::default();
        assert_eq!(
            OrsRouteProvider::from_config(&config).unwrap_err(),
            RouteError::MissingApiKey
        );
    }

    #[test]
    fn test_directions_url() {
        let config = RouteConfig {
            base_url: "https://api.openrouteservice.org/".to_string(),
            api_key: Some("key".to_string()),
            profile: "foot-walking".to_string(),
        };
        let provider = OrsRouteProvider::from_config(&config).unwrap();
        assert_eq!(
            provider.directions_url(),
            "https://api.openrouteservice.org/v2/directions/foot-walking/geojson"
        );
    }

    #[tokio::test]
    async fn test_plan_route_degrades_to_empty() {
        let route = plan_route(
            &FailingRoutes,
            &Position::new(28.6, 77.2),
            &Position::new(28.7, 77.3),
        )
        .await;
        assert!(route.is_empty());
    }
}
