use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{DeliveryTransport, SendResult};
use crate::error::WebhookError;
use crate::types::{Event, WebhookSubscription};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_SUBSCRIPTION: &str = "X-Webhook-Subscription";
pub const HEADER_SIGNATURE: &str = "X-Signature-256";

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Request timeout of [`HttpTransport::new`]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers events as signed JSON POST requests
pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    /// Transport with [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Panics
    ///
    /// If the TLS backend cannot be initialized, like `reqwest::Client::new`.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT).expect("Failed to create HTTP client")
    }

    /// Every request is abandoned after `timeout`, connecting included.
    pub fn with_timeout(timeout: Duration) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()
            .map_err(|e| WebhookError::InvalidConfig(e.to_string()))?;
        Ok(Self { http_client })
    }

    pub fn sign_payload(payload: &str, secret: &str) -> Result<String, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| WebhookError::Internal(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn format_time(t: OffsetDateTime) -> String {
        t.format(&Rfc3339).unwrap_or_default()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        event: &Event,
    ) -> Result<SendResult, WebhookError> {
        let body = json!({
            "event": event.name,
            "payload": event.payload,
            "occurredAt": Self::format_time(event.occurred_at),
            "deliveredAt": Self::format_time(OffsetDateTime::now_utc()),
        });

        let body_str =
            serde_json::to_string(&body).map_err(|e| WebhookError::SendFailed(e.to_string()))?;

        let mut request = self
            .http_client
            .post(&subscription.endpoint_url)
            .header("Content-Type", "application/json")
            .header(HEADER_EVENT, &event.name)
            .header(HEADER_SUBSCRIPTION, &subscription.id);

        if let Some(secret) = &subscription.secret {
            let signature = Self::sign_payload(&body_str, secret)?;
            request = request.header(HEADER_SIGNATURE, format!("sha256={signature}"));
        }

        let response = request
            .body(body_str)
            .send()
            .await
            .map_err(|e| WebhookError::SendFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(SendResult {
                success: true,
                status_code: Some(status.as_u16()),
                error: None,
            });
        }

        let text = response.text().await.unwrap_or_default();
        let text: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        Ok(SendResult {
            success: false,
            status_code: Some(status.as_u16()),
            error: Some(format!("HTTP {}: {}", status.as_u16(), text)),
        })
    }
}
