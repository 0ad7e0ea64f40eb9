//! Trigger fusion
//!
//! Five independent producers can ask for an SOS: the manual button, an
//! accelerometer impact, a spoken keyword, prolonged stillness and leaving
//! the expected route. [`TriggerAggregator`] turns each of them into a
//! single canonical [`SosRequest`] tagged with a [`SosReason`].
//!
//! Stillness and off-route are edge-triggered: they fire once per episode
//! and re-arm only after the condition clears. Off-route is advisory unless
//! `off_route_triggers_sos` is enabled.

use crate::config::Config;
use crate::geo::Position;
use crate::monitor::RouteStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an SOS was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SosReason {
    Manual,
    Stillness,
    Impact,
    Voice,
    OffRoute,
}

impl SosReason {
    /// Short label used in logs, history and dispatch reports
    pub fn label(&self) -> &'static str {
        match self {
            SosReason::Manual => "Manual",
            SosReason::Stillness => "Stillness",
            SosReason::Impact => "Impact",
            SosReason::Voice => "Voice",
            SosReason::OffRoute => "OffRoute",
        }
    }

    /// Free-text notes attached to the outgoing alert
    pub fn default_notes(&self) -> &'static str {
        match self {
            SosReason::Manual => "Manual SOS triggered by user",
            SosReason::Stillness => "Auto SOS due to no movement",
            SosReason::Impact => "Auto SOS due to a detected impact",
            SosReason::Voice => "Voice SOS keyword detected",
            SosReason::OffRoute => "Auto SOS after leaving the expected route",
        }
    }

    /// Title of the local pre-alert notification
    pub fn alert_title(&self) -> &'static str {
        match self {
            SosReason::Manual => "SOS requested",
            SosReason::Stillness => "No movement detected",
            SosReason::Impact => "Impact detected",
            SosReason::Voice => "Voice SOS detected",
            SosReason::OffRoute => "Off route",
        }
    }
}

impl fmt::Display for SosReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical SOS intent produced by the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SosRequest {
    pub reason: SosReason,
    pub notes: String,
}

impl SosRequest {
    pub fn new(reason: SosReason) -> Self {
        Self {
            reason,
            notes: reason.default_notes().to_string(),
        }
    }
}

/// A resolved SOS: the request plus the position it will be sent with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosEvent {
    pub position: Position,
    pub reason: SosReason,
    pub notes: String,
}

/// One accelerometer reading in g
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Total force, sqrt(x² + y² + z²)
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// What an off-route observation should lead to
#[derive(Debug, Clone, PartialEq)]
pub enum RouteTrigger {
    /// Nothing new to report
    None,
    /// Warn the user only
    Advisory { distance_m: f64 },
    /// Warn the user and request an SOS
    Sos {
        distance_m: f64,
        request: SosRequest,
    },
}

/// Fuses trigger sources into [`SosRequest`]s
#[derive(Debug, Clone)]
pub struct TriggerAggregator {
    stillness_threshold_secs: u64,
    impact_threshold_g: f64,
    keywords: Vec<String>,
    off_route_triggers_sos: bool,
    stillness_fired: bool,
    off_route_fired: bool,
}

impl TriggerAggregator {
    pub fn new(
        stillness_threshold_secs: u64,
        impact_threshold_g: f64,
        keywords: &[String],
        off_route_triggers_sos: bool,
    ) -> Self {
        Self {
            stillness_threshold_secs,
            impact_threshold_g,
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            off_route_triggers_sos,
            stillness_fired: false,
            off_route_fired: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.monitoring.stillness_threshold_secs,
            config.impact.threshold_g,
            &config.voice.keywords,
            config.monitoring.off_route_triggers_sos,
        )
    }

    /// Manual requests are always allowed
    pub fn manual(&self) -> SosRequest {
        SosRequest::new(SosReason::Manual)
    }

    /// Edge-triggered stillness check
    ///
    /// Fires once when the accumulated duration reaches the threshold while
    /// no countdown is running. If a countdown is already running at the
    /// crossing, the episode stays armed so it can fire once that countdown
    /// ends.
    pub fn on_stillness(&mut self, unchanged_secs: u64, countdown_active: bool) -> Option<SosRequest> {
        if unchanged_secs < self.stillness_threshold_secs {
            self.stillness_fired = false;
            return None;
        }

        if self.stillness_fired || countdown_active {
            return None;
        }

        self.stillness_fired = true;
        tracing::info!(
            "Stillness threshold crossed ({}s >= {}s)",
            unchanged_secs,
            self.stillness_threshold_secs
        );
        Some(SosRequest::new(SosReason::Stillness))
    }

    /// Edge-triggered off-route check, once per deviation episode
    pub fn on_route_status(&mut self, status: &RouteStatus) -> RouteTrigger {
        match *status {
            RouteStatus::OnRoute => {
                if self.off_route_fired {
                    tracing::info!("Back on the expected route");
                }
                self.off_route_fired = false;
                RouteTrigger::None
            }
            RouteStatus::OffRoute { distance_m } => {
                if self.off_route_fired {
                    return RouteTrigger::None;
                }
                self.off_route_fired = true;
                tracing::warn!("Deviated {:.0}m from the expected route", distance_m);

                if self.off_route_triggers_sos {
                    RouteTrigger::Sos {
                        distance_m,
                        request: SosRequest {
                            reason: SosReason::OffRoute,
                            notes: format!(
                                "{} ({:.0}m away)",
                                SosReason::OffRoute.default_notes(),
                                distance_m
                            ),
                        },
                    }
                } else {
                    RouteTrigger::Advisory { distance_m }
                }
            }
        }
    }

    /// Impact check; every crossing requests an SOS
    pub fn on_acceleration(&self, sample: &AccelSample) -> Option<SosRequest> {
        let magnitude = sample.magnitude();
        if magnitude > self.impact_threshold_g {
            tracing::info!(
                "Impact detected: {:.2}g > {:.2}g",
                magnitude,
                self.impact_threshold_g
            );
            Some(SosRequest::new(SosReason::Impact))
        } else {
            None
        }
    }

    /// First configured keyword contained in `utterance`, case-insensitive
    pub fn matched_keyword(&self, utterance: &str) -> Option<&str> {
        let spoken = utterance.to_lowercase();
        self.keywords
            .iter()
            .find(|k| spoken.contains(k.as_str()))
            .map(|k| k.as_str())
    }

    /// Keyword check on a recognised utterance
    pub fn on_utterance(&self, utterance: &str) -> Option<SosRequest> {
        let keyword = self.matched_keyword(utterance)?;
        tracing::info!("Voice keyword '{}' matched", keyword);
        Some(SosRequest {
            reason: SosReason::Voice,
            notes: format!("{} (\"{}\")", SosReason::Voice.default_notes(), keyword),
        })
    }

    /// Clear edge-trigger latches at the end of a trip
    pub fn reset(&mut self) {
        self.stillness_fired = false;
        self.off_route_fired = false;
    }
}
