use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::WebhookError;

/// A domain event produced by some action inside an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,

    /// Arbitrary JSON payload, delivered as-is
    pub payload: serde_json::Value,

    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: OffsetDateTime,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            occurred_at,
        }
    }
}

/// An external endpoint registered to receive events of one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    pub id: String,
    pub organization_id: String,
    pub endpoint_url: String,

    /// Event-name filters. Empty means the subscription receives every event.
    #[serde(default)]
    pub event_names: Vec<String>,

    pub active: bool,

    /// HMAC key handed to the transport for request signing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl WebhookSubscription {
    /// Whether the event-name filter lets `event_name` through.
    pub fn is_interested_in(&self, event_name: &str) -> bool {
        self.event_names.is_empty() || self.event_names.iter().any(|n| n == event_name)
    }

    /// Active and interested.
    pub fn accepts(&self, event: &Event) -> bool {
        self.active && self.is_interested_in(&event.name)
    }
}

/// Request to register a subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    pub organization_id: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub event_names: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Persisted outcome of the latest attempt of a delivery.
///
/// There is no pending status: a record is only written once an attempt
/// has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(WebhookError::Internal(format!(
                "unknown delivery status '{other}'"
            ))),
        }
    }
}

/// One delivery of one event to one subscription, and the unit of retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub id: String,
    pub organization_id: String,

    /// Weak reference; the subscription may be gone by redrive time
    pub subscription_id: String,

    pub event_name: String,

    /// Snapshot of the event payload taken when the record was created
    pub payload: serde_json::Value,

    pub status: DeliveryStatus,

    /// Starts at 1, grows by exactly one per processed redrive
    pub attempt: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Time of the last processed attempt; anchors the backoff window.
    /// Absent after a failed first dispatch.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub delivered_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    /// Redrive lease held by the worker currently retrying this record
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub claimed_until: Option<OffsetDateTime>,
}

impl WebhookDelivery {
    /// Record of the first attempt made by dispatch.
    pub fn first_attempt(
        subscription: &WebhookSubscription,
        event: &Event,
        outcome: Result<(), String>,
        now: OffsetDateTime,
    ) -> Self {
        let (status, last_error, delivered_at) = match outcome {
            Ok(()) => (DeliveryStatus::Success, None, Some(now)),
            Err(error) => (DeliveryStatus::Failed, Some(error), None),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: subscription.organization_id.clone(),
            subscription_id: subscription.id.clone(),
            event_name: event.name.clone(),
            payload: event.payload.clone(),
            status,
            attempt: 1,
            last_error,
            delivered_at,
            created_at: now,
            updated_at: now,
            claimed_until: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}

/// Delivery counts for one organization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub success: u32,

    /// Failed and still below the attempt cutoff
    pub failed: u32,

    /// Failed at or beyond the attempt cutoff
    pub terminal: u32,
}
