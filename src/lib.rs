//! TripGuard - personal-safety trip guardian
//!
//! Watches position, acceleration and spoken keywords during a trip and runs
//! a cancellable SOS countdown before alerting emergency contacts.

pub mod config;
pub mod contacts;
pub mod countdown;
pub mod database;
pub mod dispatch;
pub mod geo;
pub mod local_alert;
pub mod monitor;
pub mod route;
pub mod sensors;
pub mod simulate;
pub mod trigger;
pub mod trip;

pub use trip::{Collaborators, RoutePlan, TripError, TripGuardian, TripState, TripStatus};

/// Install the global tracing subscriber
///
/// Logs go to stdout and to `~/.tripguard/logs/tripguard.log`, filtered by
/// `RUST_LOG` (default `info`). Falls back to stdout only if the log file
/// cannot be opened.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    /// Format timestamps using the system's local time via chrono
    struct LocalTimer;
    impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
        fn format_time(
            &self,
            w: &mut tracing_subscriber::fmt::format::Writer<'_>,
        ) -> std::fmt::Result {
            write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        }
    }

    let log_dir = config::get_config_dir().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("tripguard.log"))
        .ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .try_init();
    }
}
