//! Alert history CRUD operations
//!
//! Every dispatch writes one row per contact so that a contact's alerts can
//! be listed, resolved and deleted individually.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::{AlertLog, DatabaseError};
use crate::dispatch::{ContactOutcome, DispatchOutcome, DispatchReport};

/// Lifecycle of a recorded alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AlertStatus {
    #[default]
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "Active",
            AlertStatus::Resolved => "Resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(AlertStatus::Active),
            "Resolved" => Ok(AlertStatus::Resolved),
            other => Err(DatabaseError::InvalidStatus(other.to_string())),
        }
    }
}

/// An alert record stored in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    /// Unique identifier (UUID)
    pub id: String,
    /// Trip the alert belongs to
    pub trip_id: String,
    /// Display name of the person who triggered the SOS
    pub name: String,
    /// Contact the alert was sent to
    pub contact: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Trigger reason label (e.g. "Stillness")
    pub reason: String,
    pub notes: String,
    /// "sent" or "failed: <reason>"
    pub outcome: String,
    pub status: AlertStatus,
    /// When the SOS was dispatched (RFC 3339)
    pub created_at: String,
}

/// Text stored in the `outcome` column
fn outcome_text(outcome: &ContactOutcome) -> String {
    match outcome {
        ContactOutcome::Sent => "sent".to_string(),
        ContactOutcome::Failed(reason) => format!("failed: {}", reason),
    }
}

/// Column list for all SELECT queries
const SELECT_COLUMNS: &str = r#"
    id, trip_id, name, contact, latitude, longitude,
    reason, notes, outcome, status, created_at
"#;

/// Map a database row to an AlertRecord
fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<AlertRecord> {
    let status: String = row.get(9)?;
    let status = status.parse::<AlertStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AlertRecord {
        id: row.get(0)?,
        trip_id: row.get(1)?,
        name: row.get(2)?,
        contact: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        reason: row.get(6)?,
        notes: row.get(7)?,
        outcome: row.get(8)?,
        status,
        created_at: row.get(10)?,
    })
}

impl AlertLog {
    /// Records one row per contact for a dispatch attempt
    ///
    /// A dispatch that never reached the gateway (no contacts) records
    /// nothing.
    pub fn record_dispatch(
        &self,
        trip_id: &str,
        name: &str,
        report: &DispatchReport,
    ) -> Result<Vec<AlertRecord>, DatabaseError> {
        let result = match &report.outcome {
            DispatchOutcome::Delivered { result } => result,
            DispatchOutcome::NoContacts => {
                tracing::debug!("Nothing to record for dispatch without contacts");
                return Ok(Vec::new());
            }
        };

        let created_at = report.dispatched_at.to_rfc3339();
        let records: Vec<AlertRecord> = result
            .per_contact
            .iter()
            .map(|(contact, outcome)| AlertRecord {
                id: Uuid::new_v4().to_string(),
                trip_id: trip_id.to_string(),
                name: name.to_string(),
                contact: contact.clone(),
                latitude: report.position.latitude,
                longitude: report.position.longitude,
                reason: report.reason.label().to_string(),
                notes: report.notes.clone(),
                outcome: outcome_text(outcome),
                status: AlertStatus::Active,
                created_at: created_at.clone(),
            })
            .collect();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for record in &records {
            tx.execute(
                r#"
                INSERT INTO alerts (
                    id, trip_id, name, contact, latitude, longitude,
                    reason, notes, outcome, status, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    record.id,
                    record.trip_id,
                    record.name,
                    record.contact,
                    record.latitude,
                    record.longitude,
                    record.reason,
                    record.notes,
                    record.outcome,
                    record.status.as_str(),
                    record.created_at,
                ],
            )?;
        }
        tx.commit()?;

        tracing::debug!(
            "Recorded {} alert(s) for trip {}",
            records.len(),
            trip_id
        );
        Ok(records)
    }

    /// Retrieves an alert by ID
    pub fn get_alert(&self, id: &str) -> Result<Option<AlertRecord>, DatabaseError> {
        let conn = self.conn.lock();
        let query = format!("SELECT {} FROM alerts WHERE id = ?1", SELECT_COLUMNS);
        let alert = conn
            .query_row(&query, params![id], row_to_alert)
            .optional()?;
        Ok(alert)
    }

    /// Lists alerts, newest first
    pub fn list_alerts(&self, limit: u32, offset: u32) -> Result<Vec<AlertRecord>, DatabaseError> {
        let conn = self.conn.lock();
        let query = format!(
            "SELECT {} FROM alerts ORDER BY created_at DESC, contact ASC LIMIT ?1 OFFSET ?2",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&query)?;
        let alerts = stmt
            .query_map(params![limit, offset], row_to_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    /// Lists every alert sent to `contact`, newest first
    pub fn list_alerts_for_contact(&self, contact: &str) -> Result<Vec<AlertRecord>, DatabaseError> {
        let conn = self.conn.lock();
        let query = format!(
            "SELECT {} FROM alerts WHERE contact = ?1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&query)?;
        let alerts = stmt
            .query_map(params![contact], row_to_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    /// Marks an alert as resolved
    ///
    /// Returns false if no such alert exists.
    pub fn resolve_alert(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE alerts SET status = ?1 WHERE id = ?2",
            params![AlertStatus::Resolved.as_str(), id],
        )?;

        if updated > 0 {
            tracing::info!("Resolved alert {}", id);
        }
        Ok(updated > 0)
    }

    /// Deletes an alert
    ///
    /// Returns false if no such alert exists.
    pub fn delete_alert(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM alerts WHERE id = ?1", params![id])?;

        if deleted > 0 {
            tracing::info!("Deleted alert {}", id);
        }
        Ok(deleted > 0)
    }

    /// Counts alerts, optionally filtered by status
    pub fn count_alerts(&self, status: Option<AlertStatus>) -> Result<usize, DatabaseError> {
        let conn = self.conn.lock();
        let count: i64 = match status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM alerts WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }
}
