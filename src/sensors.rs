//! Accelerometer and speech stream seams
//!
//! Platform sensor streams are consumed through channels. Each subscription
//! is held by a guard that unsubscribes (or stops listening) when dropped,
//! so aborting the task that owns it always releases the sensor.

use crate::trigger::AccelSample;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Accelerometer stream provider
pub trait AccelerometerSource: Send + Sync {
    /// Start delivering samples at roughly `interval`
    fn subscribe(&self, interval: Duration) -> mpsc::Receiver<AccelSample>;

    /// Stop delivering samples; must be idempotent
    fn unsubscribe(&self);
}

/// Speech recogniser failure (not a keyword miss)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Speech recognition error: {0}")]
pub struct RecognitionError(pub String);

/// Event from the speech recogniser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// A recognised utterance
    Utterance(String),
    /// Recognition failed; listening must be restarted
    Error(RecognitionError),
}

/// Speech recogniser provider
pub trait SpeechSource: Send + Sync {
    /// Begin a listening session
    fn start(&self) -> Result<mpsc::Receiver<SpeechEvent>, RecognitionError>;

    /// End the current listening session; must be idempotent
    fn stop(&self);
}

/// Live accelerometer subscription; unsubscribes on drop
pub struct AccelSubscription {
    source: Arc<dyn AccelerometerSource>,
    receiver: mpsc::Receiver<AccelSample>,
}

impl AccelSubscription {
    pub fn open(source: Arc<dyn AccelerometerSource>, interval: Duration) -> Self {
        let receiver = source.subscribe(interval);
        tracing::debug!("Accelerometer subscribed ({}ms)", interval.as_millis());
        Self { source, receiver }
    }

    /// Next sample, or `None` once the source closes the stream
    pub async fn next(&mut self) -> Option<AccelSample> {
        self.receiver.recv().await
    }
}

impl Drop for AccelSubscription {
    fn drop(&mut self) {
        self.source.unsubscribe();
        tracing::debug!("Accelerometer unsubscribed");
    }
}

/// Live listening session; stops the recogniser on drop
pub struct SpeechSession {
    source: Arc<dyn SpeechSource>,
    receiver: mpsc::Receiver<SpeechEvent>,
}

impl SpeechSession {
    pub fn open(source: Arc<dyn SpeechSource>) -> Result<Self, RecognitionError> {
        let receiver = source.start()?;
        tracing::debug!("Speech recognition started");
        Ok(Self { source, receiver })
    }

    /// Next event, or `None` once the recogniser closes the stream
    pub async fn next(&mut self) -> Option<SpeechEvent> {
        self.receiver.recv().await
    }
}

impl Drop for SpeechSession {
    fn drop(&mut self) {
        self.source.stop();
        tracing::debug!("Speech recognition stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{ChannelAccelerometer, ChannelSpeech};

    #[tokio::test]
    async fn test_accel_subscription_unsubscribes_on_drop() {
        let source = Arc::new(ChannelAccelerometer::new());
        let mut sub = AccelSubscription::open(source.clone(), Duration::from_millis(300));
        assert!(source.is_subscribed());

        source.push(AccelSample::new(0.0, 0.0, 1.0));
        assert_eq!(sub.next().await, Some(AccelSample::new(0.0, 0.0, 1.0)));

        drop(sub);
        assert!(!source.is_subscribed());
        assert_eq!(source.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_speech_session_stops_on_drop() {
        let source = Arc::new(ChannelSpeech::new());
        let mut session = SpeechSession::open(source.clone()).unwrap();
        assert!(source.is_listening());

        source.say("hello there");
        assert_eq!(
            session.next().await,
            Some(SpeechEvent::Utterance("hello there".to_string()))
        );

        drop(session);
        assert!(!source.is_listening());
    }

    #[test]
    fn test_recognition_error_display() {
        let e = RecognitionError("no match".to_string());
        assert_eq!(e.to_string(), "Speech recognition error: no match");
    }
}
