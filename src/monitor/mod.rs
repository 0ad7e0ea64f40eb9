//! Position-derived danger signals
//!
//! Both detectors are fed by the trip machine on every successful position
//! sample. Neither mutates trip state directly; they report what they see
//! and the trigger aggregator decides whether it warrants an SOS.

pub mod deviation;
pub mod stillness;

pub use deviation::{ExpectedRoute, RouteDeviationDetector, RouteStatus};
pub use stillness::{Stillness, StillnessDetector};
