//! SOS dispatch
//!
//! Fans one SOS out to every contact concurrently and collects a per-contact
//! outcome. One contact failing never cancels the sends to the others, and
//! the dispatcher itself never retries; retry policy belongs to the gateway.

pub mod gateway;

pub use gateway::{
    GatewayError, HttpGateway, NotificationGateway, SosMessage, TriggerSosRequest,
};

use crate::geo::Position;
use crate::trigger::SosReason;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Delivery outcome for one contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ContactOutcome {
    Sent,
    Failed(String),
}

impl ContactOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ContactOutcome::Sent)
    }
}

/// Per-contact results of one dispatch attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub per_contact: BTreeMap<String, ContactOutcome>,
}

impl DispatchResult {
    /// True only if every contact was reached
    pub fn all_sent(&self) -> bool {
        !self.per_contact.is_empty() && self.per_contact.values().all(ContactOutcome::is_sent)
    }

    pub fn sent_count(&self) -> usize {
        self.per_contact.values().filter(|o| o.is_sent()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.per_contact.len() - self.sent_count()
    }

    /// Contacts that could not be reached
    pub fn failed_contacts(&self) -> Vec<&str> {
        self.per_contact
            .iter()
            .filter(|(_, o)| !o.is_sent())
            .map(|(c, _)| c.as_str())
            .collect()
    }

    /// One-line summary suitable for a user notice
    pub fn summary(&self) -> String {
        if self.all_sent() {
            "Message sent to all contacts.".to_string()
        } else {
            format!(
                "Alert reached {} of {} contacts. Could not alert: {}",
                self.sent_count(),
                self.per_contact.len(),
                self.failed_contacts().join(", ")
            )
        }
    }
}

/// Dispatch precondition failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("No emergency contacts configured")]
    NoContacts,
}

/// How a dispatch attempt ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered { result: DispatchResult },
    NoContacts,
}

/// Record of a dispatch attempt, kept for user-visible reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub reason: SosReason,
    pub position: Position,
    pub notes: String,
    pub dispatched_at: DateTime<Utc>,
    pub outcome: DispatchOutcome,
}

impl DispatchReport {
    /// Aggregate success: every contact reached
    pub fn success(&self) -> bool {
        match &self.outcome {
            DispatchOutcome::Delivered { result } => result.all_sent(),
            DispatchOutcome::NoContacts => false,
        }
    }
}

/// Fans SOS messages out through a [`NotificationGateway`]
#[derive(Clone)]
pub struct SosDispatcher {
    gateway: Arc<dyn NotificationGateway>,
    display_name: String,
}

impl SosDispatcher {
    pub fn new(gateway: Arc<dyn NotificationGateway>, display_name: impl Into<String>) -> Self {
        Self {
            gateway,
            display_name: display_name.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Build the message that will be sent for this SOS
    pub fn compose(&self, position: &Position, notes: &str) -> SosMessage {
        SosMessage {
            name: self.display_name.clone(),
            latitude: position.latitude,
            longitude: position.longitude,
            notes: notes.to_string(),
        }
    }

    /// Send the SOS to every contact and wait for all outcomes
    ///
    /// Duplicate contacts are sent to once.
    pub async fn dispatch(
        &self,
        position: &Position,
        reason: SosReason,
        notes: &str,
        contacts: &[String],
    ) -> Result<DispatchResult, DispatchError> {
        let recipients: BTreeSet<&str> = contacts
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();

        if recipients.is_empty() {
            tracing::warn!("SOS dispatch ({}) aborted: no contacts", reason);
            return Err(DispatchError::NoContacts);
        }

        let message = self.compose(position, notes);
        tracing::info!(
            "Dispatching {} SOS to {} contact(s) at {:.5},{:.5}",
            reason,
            recipients.len(),
            position.latitude,
            position.longitude
        );

        let sends = recipients.iter().map(|&contact| {
            let message = &message;
            async move {
                let outcome = match self.gateway.send(message, contact).await {
                    Ok(()) => ContactOutcome::Sent,
                    Err(e) => {
                        tracing::error!("SOS to {} failed: {}", contact, e);
                        ContactOutcome::Failed(e.to_string())
                    }
                };
                (contact.to_string(), outcome)
            }
        });

        let result = DispatchResult {
            per_contact: join_all(sends).await.into_iter().collect(),
        };

        tracing::info!(
            "SOS dispatch complete: {} sent, {} failed",
            result.sent_count(),
            result.failed_count()
        );
        Ok(result)
    }
}
