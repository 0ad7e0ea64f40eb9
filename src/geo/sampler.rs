//! Scheduled position sampling
//!
//! [`GeoSampler::samples`] turns a [`PositionProvider`] into a lazy,
//! infinite stream of [`PositionSample`]s, one per sampling interval. No fix
//! is requested until the stream is polled, and calling `samples()` again
//! starts a fresh sequence with its own interval.

use super::{acquire_position, AcquisitionError, Position, PositionProvider};
use crate::config::MonitoringConfig;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// One scheduled sampling attempt
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    /// When the attempt completed
    pub taken_at: DateTime<Utc>,
    /// The fix, or why it could not be obtained
    pub result: Result<Position, AcquisitionError>,
}

impl PositionSample {
    /// Whether this tick failed to produce a fix
    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }

    /// The position, if acquisition succeeded
    pub fn position(&self) -> Option<&Position> {
        self.result.as_ref().ok()
    }
}

/// Periodic position sampler
#[derive(Clone)]
pub struct GeoSampler {
    provider: Arc<dyn PositionProvider>,
    interval: Duration,
    acquisition_timeout: Duration,
}

impl GeoSampler {
    pub fn new(
        provider: Arc<dyn PositionProvider>,
        interval: Duration,
        acquisition_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            interval,
            acquisition_timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn PositionProvider>, config: &MonitoringConfig) -> Self {
        Self::new(
            provider,
            config.sampling_interval(),
            config.acquisition_timeout(),
        )
    }

    /// Take a single fix right now
    pub async fn sample(&self) -> Result<Position, AcquisitionError> {
        acquire_position(self.provider.as_ref(), self.acquisition_timeout).await
    }

    /// Infinite stream of samples, the first one arriving after one interval
    ///
    /// A slow fix delays the following tick rather than bunching ticks up.
    pub fn samples(&self) -> impl Stream<Item = PositionSample> + Send + 'static {
        let state = SamplerState {
            provider: Arc::clone(&self.provider),
            period: self.interval,
            timeout: self.acquisition_timeout,
            ticker: None,
        };

        stream::unfold(state, |mut state| async move {
            let period = state.period;
            let ticker = state.ticker.get_or_insert_with(|| {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            ticker.tick().await;

            let result = acquire_position(state.provider.as_ref(), state.timeout).await;
            if let Err(ref e) = result {
                tracing::debug!("Scheduled position sample failed: {}", e);
            }

            let sample = PositionSample {
                taken_at: Utc::now(),
                result,
            };
            Some((sample, state))
        })
    }
}

struct SamplerState {
    provider: Arc<dyn PositionProvider>,
    period: Duration,
    timeout: Duration,
    ticker: Option<Interval>,
}
