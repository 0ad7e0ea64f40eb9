//! Alert history integration tests for TripGuard.
//!
//! Uses a database file in a temporary directory so migrations and
//! persistence across reopen are exercised the same way as on disk.

use chrono::Utc;
use std::collections::BTreeMap;
use tempfile::TempDir;
use tripguard::database::{AlertLog, AlertStatus};
use tripguard::dispatch::{ContactOutcome, DispatchOutcome, DispatchReport, DispatchResult};
use tripguard::geo::Position;
use tripguard::trigger::SosReason;

fn report(outcomes: &[(&str, ContactOutcome)]) -> DispatchReport {
    let per_contact: BTreeMap<String, ContactOutcome> = outcomes
        .iter()
        .map(|(contact, outcome)| (contact.to_string(), outcome.clone()))
        .collect();

    DispatchReport {
        reason: SosReason::Impact,
        position: Position::new(28.6, 77.2),
        notes: "Impact detected".to_string(),
        dispatched_at: Utc::now(),
        outcome: DispatchOutcome::Delivered {
            result: DispatchResult { per_contact },
        },
    }
}

#[test]
fn test_open_creates_database_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("tripguard.db");

    let log = AlertLog::open(&path).unwrap();
    assert!(path.exists());
    assert_eq!(log.count_alerts(None).unwrap(), 0);
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tripguard.db");

    let recorded = {
        let log = AlertLog::open(&path).unwrap();
        log.record_dispatch(
            "trip-1",
            "Asha",
            &report(&[
                ("+919876543210", ContactOutcome::Sent),
                ("+919876543211", ContactOutcome::Failed("timeout".to_string())),
            ]),
        )
        .unwrap()
    };
    assert_eq!(recorded.len(), 2);

    let log = AlertLog::open(&path).unwrap();
    assert_eq!(log.count_alerts(None).unwrap(), 2);

    let failed = log.list_alerts_for_contact("+919876543211").unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].outcome, "failed: timeout");
    assert_eq!(failed[0].trip_id, "trip-1");
    assert_eq!(failed[0].name, "Asha");
    assert_eq!(failed[0].reason, SosReason::Impact.label());
    assert_eq!(failed[0].status, AlertStatus::Active);
}

#[test]
fn test_resolve_then_delete() {
    let dir = TempDir::new().unwrap();
    let log = AlertLog::open(&dir.path().join("tripguard.db")).unwrap();

    let records = log
        .record_dispatch(
            "trip-2",
            "Asha",
            &report(&[("+919876543210", ContactOutcome::Sent)]),
        )
        .unwrap();
    let id = &records[0].id;

    assert!(log.resolve_alert(id).unwrap());
    assert_eq!(log.count_alerts(Some(AlertStatus::Resolved)).unwrap(), 1);
    assert_eq!(log.count_alerts(Some(AlertStatus::Active)).unwrap(), 0);
    assert_eq!(
        log.get_alert(id).unwrap().map(|a| a.status),
        Some(AlertStatus::Resolved)
    );

    assert!(log.delete_alert(id).unwrap());
    assert!(!log.delete_alert(id).unwrap());
    assert!(log.get_alert(id).unwrap().is_none());
}

#[test]
fn test_pagination_over_dispatches() {
    let dir = TempDir::new().unwrap();
    let log = AlertLog::open(&dir.path().join("tripguard.db")).unwrap();

    for trip in ["a", "b", "c"] {
        log.record_dispatch(
            trip,
            "Asha",
            &report(&[
                ("+919876543210", ContactOutcome::Sent),
                ("+919876543211", ContactOutcome::Sent),
            ]),
        )
        .unwrap();
    }

    assert_eq!(log.list_alerts(4, 0).unwrap().len(), 4);
    assert_eq!(log.list_alerts(4, 4).unwrap().len(), 2);
    assert!(log.list_alerts(4, 8).unwrap().is_empty());
}

#[test]
fn test_no_contacts_dispatch_records_nothing() {
    let dir = TempDir::new().unwrap();
    let log = AlertLog::open(&dir.path().join("tripguard.db")).unwrap();

    let mut empty = report(&[]);
    empty.outcome = DispatchOutcome::NoContacts;

    assert!(log.record_dispatch("trip-3", "Asha", &empty).unwrap().is_empty());
    assert_eq!(log.count_alerts(None).unwrap(), 0);
}
