//! Scripted collaborators
//!
//! In-process implementations of every platform seam, driven by scripts and
//! channels instead of hardware. The replay binary uses them to run recorded
//! scenarios, and the test suites use them to observe what the trip machine
//! asked for.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::dispatch::{GatewayError, NotificationGateway, SosMessage};
use crate::geo::{AcquisitionError, PermissionStatus, Position, PositionProvider};
use crate::local_alert::{LocalAlertError, LocalAlertSink};
use crate::sensors::{AccelerometerSource, RecognitionError, SpeechEvent, SpeechSource};
use crate::trigger::AccelSample;

/// Buffer size for scripted sensor channels
const CHANNEL_CAPACITY: usize = 64;

/// Position provider that replays a fixed track
///
/// Each acquisition takes the next entry; `None` entries fail. Once the
/// script is exhausted the last entry repeats forever.
pub struct ScriptedPositions {
    script: Vec<Option<(f64, f64)>>,
    fixes: AtomicUsize,
    permission: PermissionStatus,
}

impl ScriptedPositions {
    pub fn new(script: Vec<Option<(f64, f64)>>) -> Self {
        Self {
            script,
            fixes: AtomicUsize::new(0),
            permission: PermissionStatus::Granted,
        }
    }

    /// Always reports the same coordinates
    pub fn stationary(latitude: f64, longitude: f64) -> Self {
        Self::new(vec![Some((latitude, longitude))])
    }

    /// Replay a track of coordinates
    pub fn track(points: &[(f64, f64)]) -> Self {
        Self::new(points.iter().copied().map(Some).collect())
    }

    /// Answer permission requests with `permission`
    pub fn with_permission(mut self, permission: PermissionStatus) -> Self {
        self.permission = permission;
        self
    }

    /// Number of acquisitions attempted so far
    pub fn fix_count(&self) -> usize {
        self.fixes.load(Ordering::SeqCst)
    }
}

impl PositionProvider for ScriptedPositions {
    fn current_position(&self) -> BoxFuture<'_, Result<Position, AcquisitionError>> {
        Box::pin(async move {
            if self.permission == PermissionStatus::Denied {
                return Err(AcquisitionError::PermissionDenied);
            }

            let index = self.fixes.fetch_add(1, Ordering::SeqCst);
            let entry = self.script.get(index).or_else(|| self.script.last());
            match entry {
                Some(Some((lat, lon))) => Ok(Position::new(*lat, *lon)),
                Some(None) => Err(AcquisitionError::Unavailable("scripted failure".to_string())),
                None => Err(AcquisitionError::Unavailable("empty script".to_string())),
            }
        })
    }

    fn request_permission(&self) -> BoxFuture<'_, PermissionStatus> {
        Box::pin(async move { self.permission })
    }
}

/// Accelerometer fed by [`ChannelAccelerometer::push`]
#[derive(Default)]
pub struct ChannelAccelerometer {
    sender: Mutex<Option<mpsc::Sender<AccelSample>>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl ChannelAccelerometer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a sample; returns false if nobody is subscribed
    pub fn push(&self, sample: AccelSample) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.try_send(sample).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.sender.lock().is_some()
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

impl AccelerometerSource for ChannelAccelerometer {
    fn subscribe(&self, _interval: Duration) -> mpsc::Receiver<AccelSample> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.sender.lock() = Some(tx);
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        rx
    }

    fn unsubscribe(&self) {
        if self.sender.lock().take().is_some() {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Speech recogniser fed by [`ChannelSpeech::say`] and [`ChannelSpeech::fail`]
#[derive(Default)]
pub struct ChannelSpeech {
    sender: Mutex<Option<mpsc::Sender<SpeechEvent>>>,
    starts: AtomicUsize,
}

impl ChannelSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a recognised utterance; returns false if not listening
    pub fn say(&self, utterance: &str) -> bool {
        self.emit(SpeechEvent::Utterance(utterance.to_string()))
    }

    /// Deliver a recognition error; returns false if not listening
    pub fn fail(&self, message: &str) -> bool {
        self.emit(SpeechEvent::Error(RecognitionError(message.to_string())))
    }

    fn emit(&self, event: SpeechEvent) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Number of listening sessions started so far
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl SpeechSource for ChannelSpeech {
    fn start(&self) -> Result<mpsc::Receiver<SpeechEvent>, RecognitionError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.sender.lock() = Some(tx);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    fn stop(&self) {
        self.sender.lock().take();
    }
}

/// Gateway that records deliveries and fails for selected contacts
#[derive(Default)]
pub struct RecordingGateway {
    failing: HashSet<String>,
    delay: Option<Duration>,
    sent: Mutex<Vec<(String, SosMessage)>>,
    calls: AtomicUsize,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message addressed to one of `contacts`
    pub fn failing(contacts: &[&str]) -> Self {
        Self {
            failing: contacts.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Take `delay` to answer each send
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Successful deliveries as (contact, message)
    pub fn sent(&self) -> Vec<(String, SosMessage)> {
        self.sent.lock().clone()
    }

    /// Every send attempt, successful or not
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NotificationGateway for RecordingGateway {
    fn send<'a>(
        &'a self,
        message: &'a SosMessage,
        to: &'a str,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.failing.contains(to) {
                return Err(GatewayError::Rejected {
                    status: 500,
                    message: "simulated failure".to_string(),
                });
            }

            self.sent.lock().push((to.to_string(), message.clone()));
            Ok(())
        })
    }
}

/// Gateway that only logs the message it would have sent
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingGateway;

impl NotificationGateway for LoggingGateway {
    fn send<'a>(
        &'a self,
        message: &'a SosMessage,
        to: &'a str,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            tracing::info!("[dry-run] SOS to {}:\n{}", to, message.text());
            Ok(())
        })
    }
}

/// Alert sink that records every request
#[derive(Default)]
pub struct RecordingAlertSink {
    haptics: AtomicUsize,
    vibrations: Mutex<Vec<Vec<u64>>>,
    notifications: Mutex<Vec<(String, String)>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn haptic_count(&self) -> usize {
        self.haptics.load(Ordering::SeqCst)
    }

    pub fn vibrations(&self) -> Vec<Vec<u64>> {
        self.vibrations.lock().clone()
    }

    /// Notifications as (title, body)
    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().clone()
    }

    /// Titles of all notifications shown so far
    pub fn titles(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }
}

impl LocalAlertSink for RecordingAlertSink {
    fn haptic(&self) -> Result<(), LocalAlertError> {
        self.haptics.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn vibrate(&self, pattern_ms: &[u64]) -> Result<(), LocalAlertError> {
        self.vibrations.lock().push(pattern_ms.to_vec());
        Ok(())
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), LocalAlertError> {
        self.notifications
            .lock()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}
