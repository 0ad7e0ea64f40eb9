//! Stillness detection
//!
//! Accumulates how long the user has stayed within a small displacement
//! epsilon of the last stable position. Displacement is measured as L1 in
//! degrees, which is monotonic with true distance at GPS-jitter scale and
//! avoids trigonometry on every tick.

use crate::config::MonitoringConfig;
use crate::geo::Position;
use serde::{Deserialize, Serialize};

/// Accumulated unchanged duration, emitted on every observed sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stillness {
    pub unchanged_seconds: u64,
}

/// Tracks time spent without meaningful movement
#[derive(Debug, Clone)]
pub struct StillnessDetector {
    last_stable: Option<Position>,
    unchanged_seconds: u64,
    interval_seconds: u64,
    epsilon_degrees: f64,
}

impl StillnessDetector {
    pub fn new(interval_seconds: u64, epsilon_degrees: f64) -> Self {
        Self {
            last_stable: None,
            unchanged_seconds: 0,
            interval_seconds,
            epsilon_degrees,
        }
    }

    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self::new(
            config.sampling_interval_secs,
            config.displacement_epsilon_deg,
        )
    }

    /// Use `position` as the stable reference without accumulating
    pub fn seed(&mut self, position: Position) {
        self.last_stable = Some(position);
        self.unchanged_seconds = 0;
    }

    /// Feed one sample and return the accumulated stillness
    ///
    /// The first sample ever observed only seeds the reference.
    pub fn observe(&mut self, position: &Position) -> Stillness {
        match self.last_stable {
            None => self.seed(*position),
            Some(stable) => {
                if position.l1_displacement(&stable) < self.epsilon_degrees {
                    self.unchanged_seconds += self.interval_seconds;
                } else {
                    self.unchanged_seconds = 0;
                    self.last_stable = Some(*position);
                }
            }
        }

        Stillness {
            unchanged_seconds: self.unchanged_seconds,
        }
    }

    pub fn unchanged_seconds(&self) -> u64 {
        self.unchanged_seconds
    }

    pub fn last_stable(&self) -> Option<&Position> {
        self.last_stable.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> StillnessDetector {
        StillnessDetector::new(10, 0.0001)
    }

    #[test]
    fn test_first_sample_seeds_without_accumulating() {
        let mut d = detector();
        let s = d.observe(&Position::new(28.6, 77.2));
        assert_eq!(s.unchanged_seconds, 0);
        assert!(d.last_stable().is_some());
    }

    #[test]
    fn test_unchanged_samples_accumulate() {
        let mut d = detector();
        d.seed(Position::new(28.6, 77.2));
        for expected in [10, 20, 30, 40, 50, 60] {
            let s = d.observe(&Position::new(28.6, 77.2));
            assert_eq!(s.unchanged_seconds, expected);
        }
    }

    #[test]
    fn test_jitter_below_epsilon_counts_as_still() {
        let mut d = detector();
        d.seed(Position::new(28.6, 77.2));
        let s = d.observe(&Position::new(28.60004, 77.20004));
        assert_eq!(s.unchanged_seconds, 10);
    }

    #[test]
    fn test_movement_resets_and_moves_reference() {
        let mut d = detector();
        d.seed(Position::new(28.6, 77.2));
        d.observe(&Position::new(28.6, 77.2));
        d.observe(&Position::new(28.6, 77.2));
        assert_eq!(d.unchanged_seconds(), 20);

        let moved = Position::new(28.601, 77.2);
        let s = d.observe(&moved);
        assert_eq!(s.unchanged_seconds, 0);
        assert_eq!(d.last_stable().unwrap().latitude, 28.601);
    }

    #[test]
    fn test_displacement_exactly_epsilon_is_movement() {
        let mut d = StillnessDetector::new(10, 0.5);
        d.seed(Position::new(0.0, 0.0));
        let s = d.observe(&Position::new(0.25, 0.25));
        assert_eq!(s.unchanged_seconds, 0);
    }

    #[test]
    fn test_slow_drift_is_measured_from_stable_reference() {
        // Each step is below epsilon but the reference does not follow,
        // so cumulative drift eventually registers as movement.
        let mut d = detector();
        d.seed(Position::new(28.6, 77.2));
        d.observe(&Position::new(28.60006, 77.2));
        assert_eq!(d.unchanged_seconds(), 10);
        d.observe(&Position::new(28.60012, 77.2));
        assert_eq!(d.unchanged_seconds(), 0);
    }
}
