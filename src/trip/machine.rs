//! Trip orchestrator
//!
//! [`TripStateMachine`] is the only owner of the [`TripSession`]. It runs as
//! a single task that consumes [`TripEvent`]s in order, so commands and
//! stream signals never race each other. [`TripGuardian`] is the handle the
//! rest of the application holds.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::state::{RoutePlan, TripEvent, TripSession, TripState, TripStatus};
use super::streams::{spawn_accelerometer, spawn_sampler, spawn_ticker, spawn_voice, TaskGuard};
use super::TripError;
use crate::config::Config;
use crate::contacts::ContactStore;
use crate::countdown::{CountdownController, CountdownState, CountdownTick};
use crate::database::AlertLog;
use crate::dispatch::{DispatchOutcome, DispatchReport, NotificationGateway, SosDispatcher};
use crate::geo::{acquire_position, GeoSampler, PermissionStatus, Position, PositionProvider, PositionSample};
use crate::local_alert::{self, LocalAlertSink};
use crate::monitor::{ExpectedRoute, RouteDeviationDetector, StillnessDetector};
use crate::route::{plan_route, RouteProvider};
use crate::sensors::{AccelSubscription, AccelerometerSource, SpeechSession, SpeechSource};
use crate::trigger::{AccelSample, RouteTrigger, SosEvent, SosRequest, TriggerAggregator};

/// Capacity of the orchestrator's event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// History trip id for SOS raised outside a trip
const NO_TRIP_ID: &str = "manual";

/// Platform services the orchestrator depends on
#[derive(Clone)]
pub struct Collaborators {
    pub positions: Arc<dyn PositionProvider>,
    pub accelerometer: Arc<dyn AccelerometerSource>,
    pub speech: Arc<dyn SpeechSource>,
    pub gateway: Arc<dyn NotificationGateway>,
    pub alerts: Arc<dyn LocalAlertSink>,
    pub contacts: Arc<dyn ContactStore>,
    /// Directions service for [`RoutePlan::To`]
    pub routes: Option<Arc<dyn RouteProvider>>,
    /// Alert history; dispatches are not recorded when absent
    pub history: Option<Arc<AlertLog>>,
}

/// Owns trip state and reacts to every [`TripEvent`]
pub struct TripStateMachine {
    config: Config,
    collaborators: Collaborators,
    dispatcher: SosDispatcher,
    aggregator: TriggerAggregator,
    deviation: RouteDeviationDetector,
    countdown: CountdownController,
    session: Option<TripSession>,
    /// Stream tasks of the active trip
    streams: Vec<TaskGuard>,
    ticker: Option<TaskGuard>,
    dispatch_task: Option<TaskGuard>,
    epoch: u64,
    /// Most recent fix, kept across trips for SOS raised while idle
    last_known_position: Option<Position>,
    last_dispatch: Option<DispatchReport>,
    published_state: TripState,
    events: mpsc::Sender<TripEvent>,
    status: watch::Sender<TripStatus>,
}

impl TripStateMachine {
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        events: mpsc::Sender<TripEvent>,
        status: watch::Sender<TripStatus>,
    ) -> Self {
        let dispatcher = SosDispatcher::new(
            Arc::clone(&collaborators.gateway),
            config.gateway.display_name.clone(),
        );

        Self {
            aggregator: TriggerAggregator::from_config(&config),
            deviation: RouteDeviationDetector::from_config(&config.monitoring),
            countdown: CountdownController::new(config.countdown.seconds),
            dispatcher,
            config,
            collaborators,
            session: None,
            streams: Vec::new(),
            ticker: None,
            dispatch_task: None,
            epoch: 0,
            last_known_position: None,
            last_dispatch: None,
            published_state: TripState::Idle,
            events,
            status,
        }
    }

    /// Current state, derived from the session and the countdown
    pub fn state(&self) -> TripState {
        if self.countdown.state() != CountdownState::Idle {
            TripState::CountingDown
        } else if self.session.is_some() {
            TripState::Armed
        } else {
            TripState::Idle
        }
    }

    pub fn session(&self) -> Option<&TripSession> {
        self.session.as_ref()
    }

    /// Build the status snapshot for the current state
    pub fn snapshot(&self) -> TripStatus {
        let session = self.session.as_ref();
        TripStatus {
            state: self.state(),
            trip_id: session.map(|s| s.id),
            started_at: session.map(|s| s.started_at),
            countdown: self.countdown.state(),
            last_known_position: session
                .map(|s| s.last_known_position)
                .or(self.last_known_position),
            last_stable_position: session.and_then(|s| s.last_stable_position().copied()),
            unchanged_seconds: session.map_or(0, |s| s.unchanged_duration_seconds()),
            route_status: session.and_then(|s| s.route_status),
            contact_count: session.map_or(0, |s| s.contacts.len()),
            last_dispatch: self.last_dispatch.clone(),
        }
    }

    /// Consume events until shutdown
    pub async fn run(mut self, mut events: mpsc::Receiver<TripEvent>) {
        tracing::info!("Trip guardian started");
        self.publish();

        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
            self.publish();
        }

        self.shutdown();
        self.publish();
        tracing::info!("Trip guardian stopped");
    }

    /// Process one event; returns false once the machine should stop
    pub async fn handle_event(&mut self, event: TripEvent) -> bool {
        match event {
            TripEvent::StartTrip { plan, reply } => {
                let result = self.start_trip(plan).await;
                let _ = reply.send(result);
            }
            TripEvent::StopTrip { reply } => {
                let _ = reply.send(self.stop_trip());
            }
            TripEvent::ManualSos { reply } => {
                let result = self.manual_sos().await;
                let _ = reply.send(result);
            }
            TripEvent::CancelSos { reply } => {
                let _ = reply.send(self.cancel_sos());
            }
            TripEvent::Shutdown => return false,

            TripEvent::PositionSampled { epoch, sample } => {
                self.on_position_sample(epoch, sample).await;
            }
            TripEvent::Acceleration { epoch, sample } => {
                self.on_acceleration(epoch, sample).await;
            }
            TripEvent::Utterance { epoch, text } => {
                self.on_utterance(epoch, &text).await;
            }
            TripEvent::SensorFault {
                epoch,
                sensor,
                message,
            } => {
                if self.is_current(epoch) {
                    local_alert::notice(
                        self.collaborators.alerts.as_ref(),
                        "Sensor unavailable",
                        &format!("{} interrupted: {}", sensor, message),
                    );
                }
            }
            TripEvent::CountdownTick { generation } => self.on_countdown_tick(generation),
            TripEvent::DispatchFinished {
                epoch,
                trip_id,
                report,
            } => self.finish_dispatch(epoch, trip_id, report),
        }
        true
    }

    /// Begin monitoring a trip
    pub async fn start_trip(&mut self, plan: RoutePlan) -> Result<Uuid, TripError> {
        if self.session.is_some() {
            return Err(TripError::AlreadyActive);
        }

        let provider = Arc::clone(&self.collaborators.positions);
        if provider.request_permission().await == PermissionStatus::Denied {
            tracing::warn!("Trip not started: location permission denied");
            return Err(TripError::PermissionDenied);
        }

        let initial = acquire_position(
            provider.as_ref(),
            self.config.monitoring.acquisition_timeout(),
        )
        .await
        .map_err(|e| {
            tracing::warn!("Trip not started: {}", e);
            TripError::from(e)
        })?;

        let contacts = self.collaborators.contacts.contacts()?;
        if contacts.is_empty() {
            tracing::warn!("Starting trip without emergency contacts");
            local_alert::notice(
                self.collaborators.alerts.as_ref(),
                "No emergency contacts",
                "SOS alerts cannot be sent until you add a contact.",
            );
        }

        let route = match plan {
            RoutePlan::None => ExpectedRoute::empty(),
            RoutePlan::Fixed(route) => route,
            RoutePlan::To(destination) => match &self.collaborators.routes {
                Some(routes) => plan_route(routes.as_ref(), &initial, &destination).await,
                None => {
                    tracing::warn!("No route provider configured, deviation detection disabled");
                    ExpectedRoute::empty()
                }
            },
        };

        self.epoch += 1;
        let session = TripSession::new(
            self.epoch,
            initial,
            StillnessDetector::from_config(&self.config.monitoring),
            route,
            contacts,
        );
        tracing::info!(
            "Trip {} started at {:.5},{:.5} ({} contact(s), {} waypoint(s))",
            session.id,
            initial.latitude,
            initial.longitude,
            session.contacts.len(),
            session.expected_route.len()
        );

        let id = session.id;
        self.last_known_position = Some(initial);
        self.session = Some(session);
        self.spawn_streams(self.epoch);
        Ok(id)
    }

    /// End the active trip, cancelling any live countdown
    pub fn stop_trip(&mut self) -> Result<(), TripError> {
        if self.session.is_none() {
            return Err(TripError::NotActive);
        }

        if self.countdown.cancel().is_some() {
            self.ticker = None;
        }
        self.end_session("stopped by user");
        Ok(())
    }

    /// Request an SOS from the user
    ///
    /// Returns false if a countdown or dispatch is already in progress.
    pub async fn manual_sos(&mut self) -> Result<bool, TripError> {
        let request = self.aggregator.manual();
        self.request_sos(request, None).await
    }

    /// Cancel a live countdown; returns false if there was nothing to cancel
    pub fn cancel_sos(&mut self) -> bool {
        match self.countdown.cancel() {
            Some(event) => {
                self.ticker = None;
                local_alert::notice(
                    self.collaborators.alerts.as_ref(),
                    "SOS cancelled",
                    &format!("{} alert cancelled, no message was sent.", event.reason),
                );
                true
            }
            None => {
                tracing::debug!("Nothing to cancel (countdown {:?})", self.countdown.state());
                false
            }
        }
    }

    fn spawn_streams(&mut self, epoch: u64) {
        let sampler = GeoSampler::from_config(
            Arc::clone(&self.collaborators.positions),
            &self.config.monitoring,
        );
        self.streams
            .push(spawn_sampler(sampler, epoch, self.events.clone()));

        if self.config.impact.enabled {
            let subscription = AccelSubscription::open(
                Arc::clone(&self.collaborators.accelerometer),
                self.config.impact.sample_interval(),
            );
            self.streams
                .push(spawn_accelerometer(subscription, epoch, self.events.clone()));
        }

        if self.config.voice.enabled {
            let speech = Arc::clone(&self.collaborators.speech);
            let first = match SpeechSession::open(Arc::clone(&speech)) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!("Speech recognition unavailable at trip start: {}", e);
                    None
                }
            };
            self.streams.push(spawn_voice(
                speech,
                first,
                self.config.voice.restart_backoff(),
                epoch,
                self.events.clone(),
            ));
        }
    }

    fn end_session(&mut self, reason: &str) {
        self.streams.clear();
        self.aggregator.reset();
        if let Some(session) = self.session.take() {
            tracing::info!("Trip {} ended: {}", session.id, reason);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.epoch == epoch)
    }

    /// Start a countdown for `request` unless one is already in progress
    async fn request_sos(
        &mut self,
        request: SosRequest,
        position: Option<Position>,
    ) -> Result<bool, TripError> {
        if self.countdown.state() != CountdownState::Idle {
            tracing::debug!(
                "Ignoring {} SOS request, countdown already {:?}",
                request.reason,
                self.countdown.state()
            );
            return Ok(false);
        }

        let cached = position
            .or_else(|| self.session.as_ref().map(|s| s.last_known_position))
            .or(self.last_known_position);
        let position = match cached {
            Some(position) => position,
            None => {
                let position = acquire_position(
                    self.collaborators.positions.as_ref(),
                    self.config.monitoring.acquisition_timeout(),
                )
                .await
                .map_err(|e| {
                    tracing::warn!("{} SOS failed, no position: {}", request.reason, e);
                    TripError::from(e)
                })?;
                self.last_known_position = Some(position);
                position
            }
        };

        let reason = request.reason;
        let event = SosEvent {
            position,
            reason,
            notes: request.notes,
        };
        let Some(generation) = self.countdown.start(event) else {
            return Ok(false);
        };

        local_alert::pre_alert(
            self.collaborators.alerts.as_ref(),
            reason,
            self.countdown.duration_secs(),
            &self.config.countdown.vibration_pattern_ms,
        );
        self.ticker = Some(spawn_ticker(generation, self.events.clone()));
        Ok(true)
    }

    async fn on_position_sample(&mut self, epoch: u64, sample: PositionSample) {
        let Some(session) = self.session.as_mut().filter(|s| s.epoch == epoch) else {
            tracing::debug!("Dropping position sample from a finished trip");
            return;
        };

        let position = match sample.result {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!("Position sample failed: {}", e);
                local_alert::notice(
                    self.collaborators.alerts.as_ref(),
                    "GPS Error",
                    "Could not fetch updated location.",
                );
                return;
            }
        };

        session.last_known_position = position;
        let stillness = session.stillness.observe(&position);
        let route_status = self.deviation.check(&session.expected_route, &position);
        if route_status.is_some() {
            session.route_status = route_status;
        }
        self.last_known_position = Some(position);

        tracing::debug!(
            "Sample {:.5},{:.5}: unchanged for {}s",
            position.latitude,
            position.longitude,
            stillness.unchanged_seconds
        );

        let mut requests = Vec::new();
        if let Some(status) = route_status {
            match self.aggregator.on_route_status(&status) {
                RouteTrigger::None => {}
                RouteTrigger::Advisory { distance_m } => {
                    self.off_route_notice(distance_m);
                }
                RouteTrigger::Sos {
                    distance_m,
                    request,
                } => {
                    self.off_route_notice(distance_m);
                    requests.push(request);
                }
            }
        }

        let countdown_busy = self.countdown.state() != CountdownState::Idle;
        if let Some(request) = self
            .aggregator
            .on_stillness(stillness.unchanged_seconds, countdown_busy)
        {
            requests.push(request);
        }

        for request in requests {
            if let Err(e) = self.request_sos(request, Some(position)).await {
                tracing::warn!("Automatic SOS failed: {}", e);
            }
        }
    }

    fn off_route_notice(&self, distance_m: f64) {
        local_alert::notice(
            self.collaborators.alerts.as_ref(),
            "Off route",
            &format!("You are {:.0} m away from the planned route.", distance_m),
        );
    }

    async fn on_acceleration(&mut self, epoch: u64, sample: AccelSample) {
        if !self.is_current(epoch) {
            return;
        }
        if let Some(request) = self.aggregator.on_acceleration(&sample) {
            if let Err(e) = self.request_sos(request, None).await {
                tracing::warn!("Impact SOS failed: {}", e);
            }
        }
    }

    async fn on_utterance(&mut self, epoch: u64, text: &str) {
        if !self.is_current(epoch) {
            return;
        }
        tracing::debug!("Heard: {:?}", text);
        if let Some(request) = self.aggregator.on_utterance(text) {
            if let Err(e) = self.request_sos(request, None).await {
                tracing::warn!("Voice SOS failed: {}", e);
            }
        }
    }

    fn on_countdown_tick(&mut self, generation: u64) {
        match self.countdown.tick(generation) {
            CountdownTick::Stale => {}
            CountdownTick::Remaining(_) => {}
            CountdownTick::Expired(event) => {
                self.ticker = None;
                self.begin_dispatch(event);
            }
        }
    }

    /// Hand the SOS to the dispatcher on its own task
    ///
    /// The dispatch is not cancellable; its result comes back as
    /// [`TripEvent::DispatchFinished`].
    fn begin_dispatch(&mut self, event: SosEvent) {
        let (epoch, trip_id, contacts) = match &self.session {
            Some(session) => (Some(session.epoch), Some(session.id), session.contacts.clone()),
            None => match self.collaborators.contacts.contacts() {
                Ok(contacts) => (None, None, contacts),
                Err(e) => {
                    tracing::error!("Could not read contacts for SOS: {}", e);
                    (None, None, Vec::new())
                }
            },
        };

        let dispatcher = self.dispatcher.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let outcome = match dispatcher
                .dispatch(&event.position, event.reason, &event.notes, &contacts)
                .await
            {
                Ok(result) => DispatchOutcome::Delivered { result },
                Err(e) => {
                    tracing::warn!("SOS not sent: {}", TripError::from(e));
                    DispatchOutcome::NoContacts
                }
            };

            let report = DispatchReport {
                reason: event.reason,
                position: event.position,
                notes: event.notes,
                dispatched_at: Utc::now(),
                outcome,
            };
            let _ = events
                .send(TripEvent::DispatchFinished {
                    epoch,
                    trip_id,
                    report,
                })
                .await;
        });
        self.dispatch_task = Some(TaskGuard::new("dispatch", handle));
    }

    fn finish_dispatch(&mut self, epoch: Option<u64>, trip_id: Option<Uuid>, report: DispatchReport) {
        self.countdown.finish();
        self.dispatch_task = None;

        if self.config.storage.alert_history {
            if let Some(history) = &self.collaborators.history {
                let trip = trip_id.map_or_else(|| NO_TRIP_ID.to_string(), |id| id.to_string());
                if let Err(e) =
                    history.record_dispatch(&trip, self.dispatcher.display_name(), &report)
                {
                    tracing::error!("Failed to record alert history: {}", e);
                }
            }
        }

        let alerts = self.collaborators.alerts.as_ref();
        match &report.outcome {
            DispatchOutcome::Delivered { result } if result.all_sent() => {
                local_alert::notice(alerts, "SOS Sent", &result.summary());
            }
            DispatchOutcome::Delivered { result } => {
                local_alert::notice(alerts, "SOS partially sent", &result.summary());
            }
            DispatchOutcome::NoContacts => {
                local_alert::notice(
                    alerts,
                    "No emergency contacts",
                    "The SOS could not be sent because no contacts are configured.",
                );
            }
        }

        self.last_dispatch = Some(report);

        if epoch.is_some() && epoch == self.session.as_ref().map(|s| s.epoch) {
            self.end_session("SOS dispatched");
        }
    }

    fn shutdown(&mut self) {
        if self.countdown.cancel().is_some() {
            tracing::warn!("Shutting down with a live SOS countdown");
        }
        self.ticker = None;
        self.dispatch_task = None;
        self.end_session("guardian shut down");
    }

    fn publish(&mut self) {
        let status = self.snapshot();
        if status.state != self.published_state {
            tracing::info!(
                "Trip state: {:?} -> {:?} ({})",
                self.published_state,
                status.state,
                status.state.description()
            );
            self.published_state = status.state;
        }
        self.status.send_replace(status);
    }
}

/// Handle to a running [`TripStateMachine`]
///
/// Dropping the handle aborts the orchestrator, which releases every
/// stream it owns.
pub struct TripGuardian {
    events: mpsc::Sender<TripEvent>,
    status: watch::Receiver<TripStatus>,
    task: Option<JoinHandle<()>>,
}

impl TripGuardian {
    /// Spawn the orchestrator on the current tokio runtime
    ///
    /// Rejects a config that fails [`Config::validate`].
    pub fn spawn(config: Config, collaborators: Collaborators) -> Result<Self, TripError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(TripStatus::default());

        let machine = TripStateMachine::new(config, collaborators, events_tx.clone(), status_tx);
        let task = tokio::spawn(machine.run(events_rx));

        Ok(Self {
            events: events_tx,
            status: status_rx,
            task: Some(task),
        })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> TripEvent,
    ) -> Result<T, TripError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(make(reply))
            .await
            .map_err(|_| TripError::ChannelClosed)?;
        response.await.map_err(|_| TripError::ChannelClosed)
    }

    /// Start a trip; returns the new trip id
    pub async fn start_trip(&self, plan: RoutePlan) -> Result<Uuid, TripError> {
        self.request(|reply| TripEvent::StartTrip { plan, reply })
            .await?
    }

    pub async fn stop_trip(&self) -> Result<(), TripError> {
        self.request(|reply| TripEvent::StopTrip { reply }).await?
    }

    /// Returns true if a countdown started
    pub async fn manual_sos(&self) -> Result<bool, TripError> {
        self.request(|reply| TripEvent::ManualSos { reply }).await?
    }

    /// Returns true if a live countdown was cancelled
    pub async fn cancel_sos(&self) -> Result<bool, TripError> {
        self.request(|reply| TripEvent::CancelSos { reply }).await
    }

    /// Latest published status
    pub fn status(&self) -> TripStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status update
    pub fn subscribe(&self) -> watch::Receiver<TripStatus> {
        self.status.clone()
    }

    /// Stop the orchestrator and wait for it to release everything
    pub async fn shutdown(mut self) {
        let _ = self.events.send(TripEvent::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Trip guardian task failed: {}", e);
            }
        }
    }
}

impl Drop for TripGuardian {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
