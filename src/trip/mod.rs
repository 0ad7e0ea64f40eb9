//! Trip monitoring and SOS orchestration
//!
//! ```text
//!            start_trip                 trigger
//! ┌──────┐ ───────────► ┌───────┐ ─────────────► ┌───────────────┐
//! │ IDLE │              │ ARMED │                │ COUNTING DOWN │
//! └──────┘ ◄─────────── └───────┘ ◄───────────── └───────────────┘
//!    ▲       stop_trip                cancel_sos        │
//!    │                                                  │ expiry, dispatch
//!    └──────────────────────────────────────────────────┘
//! ```
//!
//! A manual SOS may also start a countdown from IDLE; cancelling it returns
//! to IDLE.

pub mod machine;
pub mod state;
pub mod streams;

pub use machine::{Collaborators, TripGuardian, TripStateMachine};
pub use state::{RoutePlan, TripEvent, TripSession, TripState, TripStatus};

use crate::config::ConfigError;
use crate::contacts::ContactsError;
use crate::dispatch::DispatchError;
use crate::geo::AcquisitionError;

/// Errors reported to trip command callers
#[derive(Debug, thiserror::Error)]
pub enum TripError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Could not get location: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("No emergency contacts configured")]
    NoContacts,

    #[error("A trip is already active")]
    AlreadyActive,

    #[error("No trip is active")]
    NotActive,

    #[error("Could not read contacts: {0}")]
    Contacts(#[from] ContactsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Trip guardian is not running")]
    ChannelClosed,
}

impl From<DispatchError> for TripError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NoContacts => TripError::NoContacts,
        }
    }
}
