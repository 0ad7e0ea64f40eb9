//! Notification gateway clients
//!
//! [`HttpGateway`] talks to the SMS relay over HTTP JSON. The request body
//! keeps the relay's established wire format
//! (`{name, lat, lon, contacts, notes}`); one request is issued per contact
//! so every recipient gets its own outcome.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::geo;

/// Default relay endpoint
pub const DEFAULT_GATEWAY_ENDPOINT: &str = "http://localhost:3000/api/trigger-sos";

/// Default timeout for a single gateway request in seconds
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;

/// Content of one SOS notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosMessage {
    /// Display name of the person in trouble
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Free-text notes (trigger reason etc.)
    pub notes: String,
}

impl SosMessage {
    /// Human-readable message text
    pub fn text(&self) -> String {
        format!(
            "{} triggered an SOS alert.\nLocation: {}\nNotes: {}",
            self.name,
            geo::maps_link(self.latitude, self.longitude),
            self.notes
        )
    }
}

/// Per-contact delivery failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Gateway rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

/// Outbound notification channel
pub trait NotificationGateway: Send + Sync {
    /// Send `message` to a single contact
    fn send<'a>(
        &'a self,
        message: &'a SosMessage,
        to: &'a str,
    ) -> BoxFuture<'a, Result<(), GatewayError>>;
}

/// Request body for the relay's trigger endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSosRequest {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub contacts: Vec<String>,
    pub notes: String,
}

impl TriggerSosRequest {
    pub fn for_contact(message: &SosMessage, contact: &str) -> Self {
        Self {
            name: message.name.clone(),
            lat: message.latitude,
            lon: message.longitude,
            contacts: vec![contact.to_string()],
            notes: message.notes.clone(),
        }
    }
}

/// Response body from the relay
#[derive(Debug, Deserialize)]
struct TriggerSosResponse {
    success: bool,
    #[serde(default)]
    message: String,
}

/// HTTP client for the SMS relay
#[derive(Debug, Clone)]
pub struct HttpGateway {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpGateway {
    /// Create a gateway client with an explicit endpoint and timeout
    pub fn with_config(endpoint: &str, timeout_secs: u64) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
            timeout,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_config(&config.endpoint, config.timeout_secs)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post(&self, body: &TriggerSosRequest) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout.as_secs())
                } else {
                    GatewayError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TriggerSosResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ParseError(e.to_string()))?;

        if parsed.success {
            Ok(())
        } else {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: parsed.message,
            })
        }
    }
}

impl NotificationGateway for HttpGateway {
    fn send<'a>(
        &'a self,
        message: &'a SosMessage,
        to: &'a str,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let body = TriggerSosRequest::for_contact(message, to);
            tracing::debug!("Posting SOS for {} to {}", to, self.endpoint);
            self.post(&body).await
        })
    }
}
