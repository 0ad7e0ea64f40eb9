//! End-to-end trip scenarios for TripGuard.
//!
//! Each test drives a [`TripGuardian`] with scripted collaborators on paused
//! tokio time, so sampling intervals and the countdown run on virtual time.

use std::sync::Arc;
use std::time::Duration;
use tripguard::config::Config;
use tripguard::contacts::StaticContacts;
use tripguard::countdown::CountdownState;
use tripguard::database::AlertLog;
use tripguard::dispatch::{ContactOutcome, DispatchOutcome, DispatchReport};
use tripguard::geo::Position;
use tripguard::monitor::{ExpectedRoute, RouteStatus};
use tripguard::simulate::{
    ChannelAccelerometer, ChannelSpeech, RecordingAlertSink, RecordingGateway, ScriptedPositions,
};
use tripguard::trigger::{AccelSample, SosReason};
use tripguard::{Collaborators, RoutePlan, TripError, TripGuardian, TripState, TripStatus};

const CONTACTS: [&str; 2] = ["+919876543210", "+919876543211"];

struct Harness {
    guardian: TripGuardian,
    accelerometer: Arc<ChannelAccelerometer>,
    speech: Arc<ChannelSpeech>,
    gateway: Arc<RecordingGateway>,
    alerts: Arc<RecordingAlertSink>,
    history: Arc<AlertLog>,
}

fn harness(positions: ScriptedPositions, contacts: &[&str], gateway: RecordingGateway) -> Harness {
    let accelerometer = Arc::new(ChannelAccelerometer::new());
    let speech = Arc::new(ChannelSpeech::new());
    let gateway = Arc::new(gateway);
    let alerts = Arc::new(RecordingAlertSink::new());
    let history = Arc::new(AlertLog::open_in_memory().unwrap());

    let collaborators = Collaborators {
        positions: Arc::new(positions),
        accelerometer: accelerometer.clone(),
        speech: speech.clone(),
        gateway: gateway.clone(),
        alerts: alerts.clone(),
        contacts: Arc::new(StaticContacts::new(contacts.iter().copied())),
        routes: None,
        history: Some(history.clone()),
    };

    Harness {
        guardian: TripGuardian::spawn(Config::default(), collaborators).unwrap(),
        accelerometer,
        speech,
        gateway,
        alerts,
        history,
    }
}

fn delhi() -> ScriptedPositions {
    ScriptedPositions::stationary(28.6, 77.2)
}

/// Wait (in virtual time) until the published status satisfies `pred`
async fn wait_for(
    guardian: &TripGuardian,
    what: &str,
    pred: impl Fn(&TripStatus) -> bool,
) -> TripStatus {
    let mut rx = guardian.subscribe();
    let waited = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            {
                let status = rx.borrow_and_update();
                if pred(&status) {
                    return status.clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("guardian stopped while waiting for {}", what);
            }
        }
    })
    .await;

    waited.unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

async fn wait_for_dispatch(guardian: &TripGuardian) -> DispatchReport {
    let status = wait_for(guardian, "dispatch", |s| s.last_dispatch.is_some()).await;
    status.last_dispatch.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_stillness_countdown_cancelled_at_third_second() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    let status = wait_for(&h.guardian, "stillness countdown", |s| {
        s.countdown == CountdownState::CountingDown { remaining: 2 }
    })
    .await;
    assert_eq!(status.state, TripState::CountingDown);
    assert_eq!(status.unchanged_seconds, 60);
    assert_eq!(
        status.last_stable_position.map(|p| (p.latitude, p.longitude)),
        Some((28.6, 77.2))
    );

    assert!(h.guardian.cancel_sos().await.unwrap());
    assert_eq!(h.guardian.status().state, TripState::Armed);

    // Stillness keeps accumulating but the episode already fired
    tokio::time::sleep(Duration::from_secs(30)).await;
    let status = h.guardian.status();
    assert_eq!(status.state, TripState::Armed);
    assert!(status.last_dispatch.is_none());
    assert_eq!(h.gateway.call_count(), 0);

    let titles = h.alerts.titles();
    assert!(titles.contains(&"No movement detected".to_string()));
    assert!(titles.contains(&"SOS cancelled".to_string()));
    assert_eq!(h.alerts.vibrations(), vec![vec![500, 500, 500]]);
}

#[tokio::test(start_paused = true)]
async fn test_impact_dispatches_to_every_contact() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    let trip_id = h.guardian.start_trip(RoutePlan::None).await.unwrap();

    assert!(h.accelerometer.push(AccelSample::new(0.0, 0.0, 3.0)));

    let report = wait_for_dispatch(&h.guardian).await;
    assert_eq!(report.reason, SosReason::Impact);
    assert!(report.success());
    assert_eq!(
        (report.position.latitude, report.position.longitude),
        (28.6, 77.2)
    );

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2);
    for (_, message) in &sent {
        assert_eq!(message.latitude, 28.6);
        assert_eq!(message.longitude, 77.2);
        assert_eq!(message.notes, SosReason::Impact.default_notes());
    }

    // The trip ends once the alert has gone out
    let status = h.guardian.status();
    assert_eq!(status.state, TripState::Idle);
    assert!(status.trip_id.is_none());

    let records = h.history.list_alerts(10, 0).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.trip_id == trip_id.to_string()));
    assert!(h.alerts.titles().contains(&"SOS Sent".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_gentle_motion_does_not_trigger() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    assert!(h.accelerometer.push(AccelSample::new(0.3, 0.4, 1.0)));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.guardian.status().state, TripState::Armed);
}

#[tokio::test(start_paused = true)]
async fn test_voice_keyword_dispatches() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    assert!(h.speech.say("please help me now"));

    let report = wait_for_dispatch(&h.guardian).await;
    assert_eq!(report.reason, SosReason::Voice);
    assert!(report.notes.contains("help"));
    assert_eq!(h.gateway.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_off_route_is_advisory() {
    let route = ExpectedRoute::new(vec![
        Position::new(28.6000, 77.2000),
        Position::new(28.6001, 77.2001),
        Position::new(28.6002, 77.2002),
    ]);
    // Second fix is roughly 5 km north of the route
    let positions = ScriptedPositions::track(&[(28.6, 77.2), (28.645, 77.2)]);
    let h = harness(positions, &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::Fixed(route)).await.unwrap();

    let status = wait_for(&h.guardian, "off route", |s| {
        s.route_status.is_some_and(|r| r.is_off_route())
    })
    .await;
    match status.route_status {
        Some(RouteStatus::OffRoute { distance_m }) => {
            assert!((4900.0..5100.0).contains(&distance_m), "distance {}", distance_m)
        }
        other => panic!("unexpected route status {:?}", other),
    }

    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = h.guardian.status();
    assert_eq!(status.state, TripState::Armed);
    assert_eq!(status.countdown, CountdownState::Idle);
    assert_eq!(h.gateway.call_count(), 0);
    assert_eq!(
        h.alerts.titles().iter().filter(|t| *t == "Off route").count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_triggers_dispatch_once() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    assert!(h.guardian.manual_sos().await.unwrap());
    assert!(!h.guardian.manual_sos().await.unwrap());
    h.accelerometer.push(AccelSample::new(0.0, 0.0, 3.0));
    h.speech.say("sos");

    let report = wait_for_dispatch(&h.guardian).await;
    assert_eq!(report.reason, SosReason::Manual);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.gateway.call_count(), 2);
    assert_eq!(h.history.count_alerts(None).unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_contacts_never_reach_gateway() {
    let h = harness(delhi(), &[], RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();
    assert!(h.alerts.titles().contains(&"No emergency contacts".to_string()));

    assert!(h.guardian.manual_sos().await.unwrap());
    let report = wait_for_dispatch(&h.guardian).await;

    assert_eq!(report.outcome, DispatchOutcome::NoContacts);
    assert!(!report.success());
    assert_eq!(h.gateway.call_count(), 0);
    assert_eq!(h.history.count_alerts(None).unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_reports_every_contact() {
    let contacts = ["+919876543210", "+919876543211", "+919876543212"];
    let gateway = RecordingGateway::failing(&["+919876543211"]);
    let h = harness(delhi(), &contacts, gateway);
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    h.guardian.manual_sos().await.unwrap();
    let report = wait_for_dispatch(&h.guardian).await;

    let DispatchOutcome::Delivered { result } = &report.outcome else {
        panic!("expected a delivered outcome, got {:?}", report.outcome);
    };
    assert_eq!(result.per_contact.len(), 3);
    assert_eq!(result.sent_count(), 2);
    assert_eq!(result.failed_contacts(), vec!["+919876543211"]);
    assert!(matches!(
        result.per_contact.get("+919876543211"),
        Some(ContactOutcome::Failed(_))
    ));
    assert!(!report.success());

    assert!(h.alerts.titles().contains(&"SOS partially sent".to_string()));
    let failed = h.history.list_alerts_for_contact("+919876543211").unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].outcome.starts_with("failed"));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_in_flight_cannot_be_cancelled() {
    let gateway = RecordingGateway::new().with_delay(Duration::from_secs(10));
    let h = harness(delhi(), &CONTACTS, gateway);
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    h.guardian.manual_sos().await.unwrap();
    wait_for(&h.guardian, "dispatching", |s| {
        s.countdown == CountdownState::Dispatching
    })
    .await;

    assert!(!h.guardian.cancel_sos().await.unwrap());
    assert!(!h.guardian.manual_sos().await.unwrap());

    let report = wait_for_dispatch(&h.guardian).await;
    assert!(report.success());
    assert_eq!(h.gateway.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_voice_restarts_after_recognition_error() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();
    assert_eq!(h.speech.start_count(), 1);

    assert!(h.speech.fail("network unavailable"));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(h.speech.start_count(), 2);
    assert!(h.speech.is_listening());
    assert!(h.alerts.titles().contains(&"Sensor unavailable".to_string()));
    assert_eq!(h.guardian.status().state, TripState::Armed);

    assert!(h.speech.say("Emergency!"));
    let report = wait_for_dispatch(&h.guardian).await;
    assert_eq!(report.reason, SosReason::Voice);
}

#[tokio::test(start_paused = true)]
async fn test_stop_trip_releases_sensors() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();
    assert!(h.accelerometer.is_subscribed());
    assert!(h.speech.is_listening());

    h.guardian.stop_trip().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!h.accelerometer.is_subscribed());
    assert_eq!(h.accelerometer.unsubscribe_count(), 1);
    assert!(!h.speech.is_listening());
    assert_eq!(h.guardian.status().state, TripState::Idle);

    assert!(matches!(
        h.guardian.stop_trip().await,
        Err(TripError::NotActive)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_trip_can_restart_after_stop() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    let first = h.guardian.start_trip(RoutePlan::None).await.unwrap();
    assert!(matches!(
        h.guardian.start_trip(RoutePlan::None).await,
        Err(TripError::AlreadyActive)
    ));

    h.guardian.stop_trip().await.unwrap();
    let second = h.guardian.start_trip(RoutePlan::None).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(h.accelerometer.subscribe_count(), 2);
    assert_eq!(h.guardian.status().trip_id, Some(second));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_sensors() {
    let h = harness(delhi(), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    let Harness {
        guardian,
        accelerometer,
        speech,
        ..
    } = h;
    guardian.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!accelerometer.is_subscribed());
    assert!(!speech.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_failed_fixes_leave_accounting_untouched() {
    let mut script = vec![Some((28.6, 77.2))];
    script.extend(std::iter::repeat(None).take(8));
    let h = harness(ScriptedPositions::new(script), &CONTACTS, RecordingGateway::new());
    h.guardian.start_trip(RoutePlan::None).await.unwrap();

    // Seven sampling intervals, every scheduled fix failing
    tokio::time::sleep(Duration::from_secs(75)).await;

    let status = h.guardian.status();
    assert_eq!(status.state, TripState::Armed);
    assert_eq!(status.countdown, CountdownState::Idle);
    assert_eq!(status.unchanged_seconds, 0);
    assert_eq!(
        status.last_known_position.map(|p| (p.latitude, p.longitude)),
        Some((28.6, 77.2))
    );

    let gps_errors = h
        .alerts
        .titles()
        .iter()
        .filter(|t| *t == "GPS Error")
        .count();
    assert_eq!(gps_errors, 7);
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_spawn_rejects_invalid_config() {
    let mut config = Config::default();
    config.monitoring.sampling_interval_secs = 0;

    let collaborators = Collaborators {
        positions: Arc::new(delhi()),
        accelerometer: Arc::new(ChannelAccelerometer::new()),
        speech: Arc::new(ChannelSpeech::new()),
        gateway: Arc::new(RecordingGateway::new()),
        alerts: Arc::new(RecordingAlertSink::new()),
        contacts: Arc::new(StaticContacts::new(CONTACTS)),
        routes: None,
        history: None,
    };

    assert!(matches!(
        TripGuardian::spawn(config, collaborators),
        Err(TripError::Config(_))
    ));
}
