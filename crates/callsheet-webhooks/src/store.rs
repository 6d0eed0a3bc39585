use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::WebhookError;
use crate::types::{DeliveryStats, DeliveryStatus, WebhookDelivery, WebhookSubscription};

/// Storage trait for webhook subscriptions
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Persist a new subscription
    async fn create_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), WebhookError>;

    /// Get a subscription by ID
    async fn get_subscription(
        &self,
        id: &str,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    /// All subscriptions of an organization, active or not
    async fn list_subscriptions(
        &self,
        organization_id: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError>;

    /// Flip the active flag. Returns false if the subscription does not exist.
    async fn set_active(&self, id: &str, active: bool) -> Result<bool, WebhookError>;
}

/// Storage trait for delivery attempt records
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persist a new delivery record
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), WebhookError>;

    /// Get a delivery by ID
    async fn get_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>, WebhookError>;

    /// Fetch failed deliveries for a redrive pass.
    ///
    /// Records below `max_attempts` come first, each group least recently
    /// updated first. Terminal records are included once retryable ones run out.
    async fn list_failed(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<WebhookDelivery>, WebhookError>;

    /// Deliveries of one subscription, newest first
    async fn list_for_subscription(
        &self,
        subscription_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError>;

    /// Deliveries of one organization by status, newest first
    async fn list_by_status(
        &self,
        organization_id: &str,
        status: DeliveryStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError>;

    /// Claim a delivery for one retry.
    ///
    /// Succeeds only if the stored `attempt` still equals `expected_attempt`
    /// and no other claim is valid at `now`. The claim expires at `until`.
    async fn try_claim(
        &self,
        id: &str,
        expected_attempt: u32,
        now: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<bool, WebhookError>;

    /// Overwrite a delivery record and release its claim, provided the stored
    /// `attempt` still equals `expected_attempt`.
    ///
    /// Returns false when another writer got there first; the record is left
    /// untouched. A missing record is an error.
    async fn update_delivery(
        &self,
        delivery: &WebhookDelivery,
        expected_attempt: u32,
    ) -> Result<bool, WebhookError>;

    /// Delivery counts of an organization; failures at or above
    /// `max_attempts` are counted as terminal
    async fn delivery_stats(
        &self,
        organization_id: &str,
        max_attempts: u32,
    ) -> Result<DeliveryStats, WebhookError>;
}
