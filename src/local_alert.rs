//! Local alert side channel
//!
//! Haptics, vibration and on-device notifications requested by the trip
//! machine. These are best effort: every request returns a `Result` so a
//! platform can report failure, and callers are free to ignore it.

use crate::trigger::SosReason;

/// Failure to present a local alert
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalAlertError {
    #[error("Local alert not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("Local alert failed: {0}")]
    Failed(String),
}

/// Platform sink for user-facing local alerts
pub trait LocalAlertSink: Send + Sync {
    /// Short haptic "error" feedback
    fn haptic(&self) -> Result<(), LocalAlertError>;

    /// Vibrate with an on/off pattern in milliseconds
    fn vibrate(&self, pattern_ms: &[u64]) -> Result<(), LocalAlertError>;

    /// Show a local notification
    fn notify(&self, title: &str, body: &str) -> Result<(), LocalAlertError>;
}

/// Sink that only logs; used headless and in replays
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl LocalAlertSink for TracingAlertSink {
    fn haptic(&self) -> Result<(), LocalAlertError> {
        tracing::debug!("Haptic feedback requested");
        Ok(())
    }

    fn vibrate(&self, pattern_ms: &[u64]) -> Result<(), LocalAlertError> {
        tracing::debug!("Vibration requested: {:?}", pattern_ms);
        Ok(())
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), LocalAlertError> {
        tracing::info!("[notice] {}: {}", title, body);
        Ok(())
    }
}

/// Pre-alert shown when a countdown starts: haptic, vibration, notification
pub fn pre_alert(
    sink: &dyn LocalAlertSink,
    reason: SosReason,
    seconds: u32,
    vibration_pattern_ms: &[u64],
) {
    if let Err(e) = sink.haptic() {
        tracing::debug!("Ignoring haptic failure: {}", e);
    }
    if let Err(e) = sink.vibrate(vibration_pattern_ms) {
        tracing::debug!("Ignoring vibration failure: {}", e);
    }
    let body = format!("Sending SOS in {} seconds if no action taken.", seconds);
    if let Err(e) = sink.notify(reason.alert_title(), &body) {
        tracing::debug!("Ignoring notification failure: {}", e);
    }
}

/// Transient user-visible notice
pub fn notice(sink: &dyn LocalAlertSink, title: &str, body: &str) {
    if let Err(e) = sink.notify(title, body) {
        tracing::debug!("Ignoring notification failure ({}): {}", title, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::RecordingAlertSink;

    struct BrokenSink;

    impl LocalAlertSink for BrokenSink {
        fn haptic(&self) -> Result<(), LocalAlertError> {
            Err(LocalAlertError::Unsupported("haptics"))
        }
        fn vibrate(&self, _pattern_ms: &[u64]) -> Result<(), LocalAlertError> {
            Err(LocalAlertError::Failed("motor busy".to_string()))
        }
        fn notify(&self, _title: &str, _body: &str) -> Result<(), LocalAlertError> {
            Err(LocalAlertError::Failed("no permission".to_string()))
        }
    }

    #[test]
    fn test_pre_alert_requests_all_channels() {
        let sink = RecordingAlertSink::new();
        pre_alert(&sink, SosReason::Stillness, 5, &[500, 500, 500]);

        assert_eq!(sink.haptic_count(), 1);
        assert_eq!(sink.vibrations(), vec![vec![500, 500, 500]]);
        assert_eq!(
            sink.notifications(),
            vec![(
                "No movement detected".to_string(),
                "Sending SOS in 5 seconds if no action taken.".to_string()
            )]
        );
    }

    #[test]
    fn test_pre_alert_swallows_failures() {
        pre_alert(&BrokenSink, SosReason::Impact, 5, &[500]);
        notice(&BrokenSink, "GPS Error", "Could not fetch updated location.");
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        let sink = TracingAlertSink;
        assert!(sink.haptic().is_ok());
        assert!(sink.vibrate(&[100]).is_ok());
        assert!(sink.notify("title", "body").is_ok());
    }
}
