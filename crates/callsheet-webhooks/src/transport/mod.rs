pub mod http;

use async_trait::async_trait;

use crate::error::WebhookError;
use crate::types::{Event, WebhookSubscription};

/// Result of one outbound delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            status_code: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: None,
            error: Some(error.into()),
        }
    }
}

/// Performs the outbound call for one (subscription, event) pair.
///
/// Implementations make a single attempt; retries belong to the engine.
/// An `Err` is treated by the engine exactly like a failed [`SendResult`].
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        event: &Event,
    ) -> Result<SendResult, WebhookError>;
}

pub use http::HttpTransport;
