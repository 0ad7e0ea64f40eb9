//! Cancellable pre-dispatch countdown
//!
//! ```text
//! ┌──────┐  start   ┌──────────────┐  final tick  ┌─────────────┐
//! │ IDLE │─────────►│ COUNTING     │─────────────►│ DISPATCHING │
//! └──────┘          │ DOWN (n)     │              └─────────────┘
//!    ▲              └──────────────┘                     │
//!    │                     │ cancel                      │ finish
//!    │◄────────────────────┴─────────────────────────────┘
//! ```
//!
//! The controller is pure state; the trip machine owns the 1 s ticker task
//! and feeds ticks back in. Every countdown gets a new generation number so
//! ticks that were already queued when a countdown was cancelled or replaced
//! are recognised as stale and dropped.

use crate::trigger::SosEvent;
use serde::{Deserialize, Serialize};

/// Countdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CountdownState {
    #[default]
    Idle,
    CountingDown {
        remaining: u32,
    },
    Dispatching,
}

/// Outcome of feeding one tick to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum CountdownTick {
    /// Tick from a cancelled or superseded countdown
    Stale,
    /// Still counting down
    Remaining(u32),
    /// Countdown finished; dispatch this event
    Expired(SosEvent),
}

/// Single-shot countdown state machine
#[derive(Debug, Clone)]
pub struct CountdownController {
    duration_secs: u32,
    state: CountdownState,
    pending: Option<SosEvent>,
    generation: u64,
}

impl CountdownController {
    pub fn new(duration_secs: u32) -> Self {
        Self {
            duration_secs: duration_secs.max(1),
            state: CountdownState::Idle,
            pending: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Seconds left, if counting down
    pub fn remaining(&self) -> Option<u32> {
        match self.state {
            CountdownState::CountingDown { remaining } => Some(remaining),
            _ => None,
        }
    }

    /// Whether a countdown is live
    pub fn is_active(&self) -> bool {
        matches!(self.state, CountdownState::CountingDown { .. })
    }

    /// The event that will be dispatched when the countdown expires
    pub fn pending(&self) -> Option<&SosEvent> {
        self.pending.as_ref()
    }

    /// Start counting down for `event`
    ///
    /// Returns the new generation, or `None` if a countdown or dispatch is
    /// already in progress (starting is idempotent).
    pub fn start(&mut self, event: SosEvent) -> Option<u64> {
        if self.state != CountdownState::Idle {
            tracing::debug!(
                "Ignoring {} SOS request, countdown already in state {:?}",
                event.reason,
                self.state
            );
            return None;
        }

        self.generation += 1;
        self.state = CountdownState::CountingDown {
            remaining: self.duration_secs,
        };
        tracing::info!(
            "SOS countdown started: {}s (reason: {})",
            self.duration_secs,
            event.reason
        );
        self.pending = Some(event);
        Some(self.generation)
    }

    /// Advance the countdown by one second
    pub fn tick(&mut self, generation: u64) -> CountdownTick {
        if generation != self.generation {
            return CountdownTick::Stale;
        }

        match self.state {
            CountdownState::CountingDown { remaining } if remaining <= 1 => {
                match self.pending.take() {
                    Some(event) => {
                        self.state = CountdownState::Dispatching;
                        tracing::info!("SOS countdown expired, dispatching ({})", event.reason);
                        CountdownTick::Expired(event)
                    }
                    None => {
                        // No backing trigger; never dispatch from here
                        tracing::error!("Countdown expired without a pending SOS event");
                        self.state = CountdownState::Idle;
                        CountdownTick::Stale
                    }
                }
            }
            CountdownState::CountingDown { remaining } => {
                let remaining = remaining - 1;
                self.state = CountdownState::CountingDown { remaining };
                tracing::debug!("SOS countdown: {}s remaining", remaining);
                CountdownTick::Remaining(remaining)
            }
            _ => CountdownTick::Stale,
        }
    }

    /// Cancel a live countdown, returning the event that will not be sent
    pub fn cancel(&mut self) -> Option<SosEvent> {
        if !self.is_active() {
            return None;
        }

        self.state = CountdownState::Idle;
        let event = self.pending.take();
        if let Some(ref e) = event {
            tracing::info!("SOS countdown cancelled (reason: {})", e.reason);
        }
        event
    }

    /// Dispatch has completed; return to idle
    pub fn finish(&mut self) {
        self.state = CountdownState::Idle;
        self.pending = None;
    }
}
