//! Retry policy and the delivery state machine derived from it.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::WebhookError;
use crate::types::{DeliveryStatus, WebhookDelivery};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_BACKOFF_MINUTES: i64 = 60;
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 300;

/// Retry policy injected into the engine at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempt count at which a failed delivery becomes terminal
    pub max_attempts: u32,

    /// Upper bound of the exponential backoff window
    pub max_backoff_minutes: i64,

    /// How long a redrive claim on a delivery stays valid
    pub claim_ttl_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_backoff_minutes: DEFAULT_MAX_BACKOFF_MINUTES,
            claim_ttl_secs: DEFAULT_CLAIM_TTL_SECS,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn validate(&self) -> Result<(), WebhookError> {
        if self.max_attempts == 0 {
            return Err(WebhookError::InvalidConfig(
                "max_attempts must be > 0".into(),
            ));
        }
        if self.max_backoff_minutes <= 0 {
            return Err(WebhookError::InvalidConfig(
                "max_backoff_minutes must be > 0".into(),
            ));
        }
        if self.claim_ttl_secs <= 0 {
            return Err(WebhookError::InvalidConfig(
                "claim_ttl_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Minimum wait after an attempt before the next retry:
    /// `min(max_backoff_minutes, 2^attempt)` minutes.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let minutes = if attempt < 62 {
            (1_i64 << attempt).min(self.max_backoff_minutes)
        } else {
            self.max_backoff_minutes
        };
        Duration::minutes(minutes)
    }

    pub fn is_terminal(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::seconds(self.claim_ttl_secs)
    }

    /// Derives the state of a delivery at `now`.
    pub fn state_of(&self, delivery: &WebhookDelivery, now: OffsetDateTime) -> DeliveryState {
        if delivery.status == DeliveryStatus::Success {
            return DeliveryState::Succeeded;
        }
        if let Some(claimed_until) = delivery.claimed_until
            && claimed_until > now
        {
            return DeliveryState::Pending { claimed_until };
        }
        if self.is_terminal(delivery.attempt) {
            return DeliveryState::FailedTerminal;
        }
        DeliveryState::FailedRetryable {
            next_eligible_at: delivery
                .delivered_at
                .map(|anchor| anchor + self.backoff(delivery.attempt)),
        }
    }
}

/// Explicit retry state of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Another redrive worker holds the claim
    Pending { claimed_until: OffsetDateTime },
    Succeeded,
    /// Retry allowed once `next_eligible_at` has passed; `None` means now
    FailedRetryable {
        next_eligible_at: Option<OffsetDateTime>,
    },
    /// Attempt cutoff reached; never retried again
    FailedTerminal,
}

impl DeliveryState {
    pub fn is_eligible(&self, now: OffsetDateTime) -> bool {
        match self {
            Self::FailedRetryable { next_eligible_at } => {
                next_eligible_at.is_none_or(|at| at <= now)
            }
            _ => false,
        }
    }
}
