//! Database schema definitions for TripGuard
//!
//! Contains SQL statements for creating and managing database tables.

/// SQL statement to create the migrations tracking table
pub const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQL statement to create the alerts table (one row per contact per dispatch)
pub const CREATE_ALERTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    trip_id TEXT NOT NULL,
    name TEXT NOT NULL,
    contact TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    reason TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    outcome TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'Active',
    created_at TEXT NOT NULL
);
"#;

pub const CREATE_ALERTS_CREATED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);
"#;

pub const CREATE_ALERTS_CONTACT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_alerts_contact ON alerts(contact);
"#;

pub const CREATE_ALERTS_TRIP_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_alerts_trip_id ON alerts(trip_id);
"#;
