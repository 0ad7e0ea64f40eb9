//! Stream tasks feeding the trip orchestrator
//!
//! One task per source. Each task owns its sensor guard, so aborting the
//! task (through [`TaskGuard`]) unsubscribes or stops the sensor.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::TripEvent;
use crate::geo::GeoSampler;
use crate::sensors::{AccelSubscription, SpeechEvent, SpeechSession, SpeechSource};

/// Aborts the wrapped task when dropped
#[derive(Debug)]
pub struct TaskGuard {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TaskGuard {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            tracing::debug!("Stopping {} task", self.name);
        }
        self.handle.abort();
    }
}

/// Forward scheduled position samples
pub fn spawn_sampler(sampler: GeoSampler, epoch: u64, events: mpsc::Sender<TripEvent>) -> TaskGuard {
    let handle = tokio::spawn(async move {
        let mut samples = Box::pin(sampler.samples());
        while let Some(sample) = samples.next().await {
            if events
                .send(TripEvent::PositionSampled { epoch, sample })
                .await
                .is_err()
            {
                break;
            }
        }
    });
    TaskGuard::new("position sampler", handle)
}

/// Forward accelerometer samples from an already opened subscription
pub fn spawn_accelerometer(
    mut subscription: AccelSubscription,
    epoch: u64,
    events: mpsc::Sender<TripEvent>,
) -> TaskGuard {
    let handle = tokio::spawn(async move {
        while let Some(sample) = subscription.next().await {
            if events
                .send(TripEvent::Acceleration { epoch, sample })
                .await
                .is_err()
            {
                return;
            }
        }

        tracing::warn!("Accelerometer stream ended");
        let _ = events
            .send(TripEvent::SensorFault {
                epoch,
                sensor: "accelerometer",
                message: "stream ended".to_string(),
            })
            .await;
    });
    TaskGuard::new("accelerometer", handle)
}

/// Forward utterances, restarting recognition after errors
///
/// `first` is the session opened when the trip started; later sessions are
/// opened here after `backoff`.
pub fn spawn_voice(
    source: Arc<dyn SpeechSource>,
    first: Option<SpeechSession>,
    backoff: Duration,
    epoch: u64,
    events: mpsc::Sender<TripEvent>,
) -> TaskGuard {
    let handle = tokio::spawn(async move {
        let mut next_session = first;
        loop {
            let mut session = match next_session.take() {
                Some(session) => session,
                None => match SpeechSession::open(Arc::clone(&source)) {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::warn!("Could not restart speech recognition: {}", e);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                },
            };

            let fault = loop {
                match session.next().await {
                    Some(SpeechEvent::Utterance(text)) => {
                        if events
                            .send(TripEvent::Utterance { epoch, text })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(SpeechEvent::Error(e)) => break e.to_string(),
                    None => break "recogniser closed the stream".to_string(),
                }
            };

            drop(session);
            tracing::warn!(
                "Speech recognition interrupted ({}), restarting in {}ms",
                fault,
                backoff.as_millis()
            );
            if events
                .send(TripEvent::SensorFault {
                    epoch,
                    sensor: "speech",
                    message: fault,
                })
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(backoff).await;
        }
    });
    TaskGuard::new("voice", handle)
}

/// One tick per second for countdown `generation`
pub fn spawn_ticker(generation: u64, events: mpsc::Sender<TripEvent>) -> TaskGuard {
    let handle = tokio::spawn(async move {
        let period = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if events
                .send(TripEvent::CountdownTick { generation })
                .await
                .is_err()
            {
                break;
            }
        }
    });
    TaskGuard::new("countdown ticker", handle)
}
