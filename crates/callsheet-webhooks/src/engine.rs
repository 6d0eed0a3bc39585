use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::WebhookError;
use crate::policy::{DeliveryState, RetryPolicy};
use crate::store::{DeliveryStore, SubscriptionStore};
use crate::time_source::{SystemTimeSource, TimeSource};
use crate::transport::DeliveryTransport;
use crate::types::{
    DeliveryStats, DeliveryStatus, Event, NewSubscription, WebhookDelivery, WebhookSubscription,
};

pub const MAX_ATTEMPTS_REACHED: &str = "max attempts reached";
pub const SUBSCRIPTION_INACTIVE: &str = "subscription inactive";

/// Outcome counts of one redrive pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedriveReport {
    /// Failed records fetched from the store
    pub scanned: u32,
    /// Transport invoked again
    pub retried: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Attempt consumed because the subscription is gone or inactive
    pub skipped_inactive: u32,
    /// Still inside the backoff window
    pub gated: u32,
    /// At or beyond the attempt cutoff
    pub terminal: u32,
    /// Claimed by another redrive worker, or advanced by one before this
    /// pass could record its attempt
    pub contended: u32,
}

/// Fans events out to subscriptions and redrives failed deliveries
pub struct WebhookEngine<S, D>
where
    S: SubscriptionStore,
    D: DeliveryStore,
{
    subscriptions: Arc<S>,
    deliveries: Arc<D>,
    transport: Arc<dyn DeliveryTransport>,
    time_source: Arc<dyn TimeSource>,
    policy: RetryPolicy,
}

impl<S, D> WebhookEngine<S, D>
where
    S: SubscriptionStore + 'static,
    D: DeliveryStore + 'static,
{
    pub fn new(
        subscriptions: Arc<S>,
        deliveries: Arc<D>,
        transport: Arc<dyn DeliveryTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
            transport,
            time_source: Arc::new(SystemTimeSource),
            policy,
        }
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Register a new endpoint for an organization.
    ///
    /// Event names are trimmed and deduplicated; an empty list subscribes to
    /// every event.
    pub async fn create_subscription(
        &self,
        request: NewSubscription,
    ) -> Result<WebhookSubscription, WebhookError> {
        if request.organization_id.trim().is_empty() {
            return Err(WebhookError::InvalidSubscription(
                "organization_id must not be empty".into(),
            ));
        }

        let url = Url::parse(request.endpoint_url.trim())
            .map_err(|e| WebhookError::InvalidSubscription(format!("endpoint_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebhookError::InvalidSubscription(format!(
                "endpoint_url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        let mut event_names: Vec<String> = Vec::with_capacity(request.event_names.len());
        for name in request.event_names {
            let name = name.trim();
            if !name.is_empty() && !event_names.iter().any(|n| n == name) {
                event_names.push(name.to_string());
            }
        }

        let subscription = WebhookSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: request.organization_id,
            endpoint_url: url.to_string(),
            event_names,
            active: true,
            secret: request.secret.filter(|s| !s.is_empty()),
            created_at: self.time_source.now(),
        };

        self.subscriptions.create_subscription(&subscription).await?;

        info!(
            subscription_id = %subscription.id,
            organization_id = %subscription.organization_id,
            "Webhook subscription created"
        );
        Ok(subscription)
    }

    pub async fn list_active(
        &self,
        organization_id: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        Ok(self
            .subscriptions
            .list_subscriptions(organization_id)
            .await?
            .into_iter()
            .filter(|s| s.active)
            .collect())
    }

    /// Soft-deactivate a subscription; it is never hard-deleted here
    pub async fn deactivate(&self, subscription_id: &str) -> Result<(), WebhookError> {
        if !self.subscriptions.set_active(subscription_id, false).await? {
            return Err(WebhookError::SubscriptionNotFound(
                subscription_id.to_string(),
            ));
        }
        info!(subscription_id, "Webhook subscription deactivated");
        Ok(())
    }

    /// Deliver `event` to every active, interested subscription of the
    /// organization and record one delivery per attempt.
    ///
    /// Transport failures are recorded, never returned; only store errors
    /// abort the sweep.
    #[instrument(skip(self, event), fields(event = %event.name))]
    pub async fn dispatch(
        &self,
        organization_id: &str,
        event: &Event,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let subscriptions = self.subscriptions.list_subscriptions(organization_id).await?;
        let mut recorded = Vec::new();

        for subscription in subscriptions.iter().filter(|s| s.accepts(event)) {
            let outcome = self.attempt(subscription, event).await;
            let now = self.time_source.now();

            if let Err(error) = &outcome {
                warn!(
                    subscription_id = %subscription.id,
                    error = %error,
                    "Webhook delivery failed"
                );
            }

            let delivery = WebhookDelivery::first_attempt(subscription, event, outcome, now);
            self.deliveries.insert_delivery(&delivery).await?;
            recorded.push(delivery);
        }

        debug!(count = recorded.len(), "Event dispatched");
        Ok(recorded)
    }

    /// Advance the retry state machine for up to `limit` failed deliveries.
    #[instrument(skip(self))]
    pub async fn redrive(&self, limit: usize) -> Result<RedriveReport, WebhookError> {
        let failed = self
            .deliveries
            .list_failed(limit, self.policy.max_attempts)
            .await?;
        let mut report = RedriveReport {
            scanned: u32::try_from(failed.len()).unwrap_or(u32::MAX),
            ..Default::default()
        };

        for delivery in failed {
            self.redrive_one(delivery, &mut report).await?;
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                retried = report.retried,
                succeeded = report.succeeded,
                skipped_inactive = report.skipped_inactive,
                terminal = report.terminal,
                "Redrive pass finished"
            );
        }
        Ok(report)
    }

    async fn redrive_one(
        &self,
        mut delivery: WebhookDelivery,
        report: &mut RedriveReport,
    ) -> Result<(), WebhookError> {
        let now = self.time_source.now();

        match self.policy.state_of(&delivery, now) {
            DeliveryState::Succeeded => return Ok(()),
            DeliveryState::Pending { claimed_until } => {
                debug!(delivery_id = %delivery.id, %claimed_until, "Delivery claimed elsewhere");
                report.contended += 1;
                return Ok(());
            }
            DeliveryState::FailedTerminal => {
                delivery.last_error = Some(MAX_ATTEMPTS_REACHED.to_string());
                delivery.updated_at = now;
                if !self
                    .deliveries
                    .update_delivery(&delivery, delivery.attempt)
                    .await?
                {
                    report.contended += 1;
                    return Ok(());
                }
                warn!(
                    delivery_id = %delivery.id,
                    attempt = delivery.attempt,
                    "Webhook delivery permanently failed after {} attempts",
                    self.policy.max_attempts
                );
                report.terminal += 1;
                return Ok(());
            }
            state @ DeliveryState::FailedRetryable { next_eligible_at } => {
                if !state.is_eligible(now) {
                    debug!(delivery_id = %delivery.id, ?next_eligible_at, "Delivery in backoff");
                    report.gated += 1;
                    return Ok(());
                }
            }
        }

        let claimed = self
            .deliveries
            .try_claim(
                &delivery.id,
                delivery.attempt,
                now,
                now + self.policy.claim_ttl(),
            )
            .await?;
        if !claimed {
            report.contended += 1;
            return Ok(());
        }

        let subscription = self
            .subscriptions
            .get_subscription(&delivery.subscription_id)
            .await?
            .filter(|s| s.active);

        let claimed_attempt = delivery.attempt;
        delivery.attempt += 1;
        delivery.delivered_at = Some(now);
        delivery.updated_at = now;

        let outcome = match subscription {
            None => {
                delivery.last_error = Some(SUBSCRIPTION_INACTIVE.to_string());
                debug!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    "Subscription gone or inactive, attempt consumed"
                );
                None
            }
            Some(subscription) => {
                // retried events are re-stamped, not replayed with their original time
                let event = Event::new(delivery.event_name.clone(), delivery.payload.clone(), now);
                let result = self.attempt(&subscription, &event).await;
                match &result {
                    Ok(()) => {
                        delivery.status = DeliveryStatus::Success;
                        delivery.last_error = None;
                    }
                    Err(error) => {
                        warn!(
                            delivery_id = %delivery.id,
                            attempt = delivery.attempt,
                            error = %error,
                            "Webhook redelivery failed"
                        );
                        delivery.status = DeliveryStatus::Failed;
                        delivery.last_error = Some(error.clone());
                    }
                }
                Some(result.is_ok())
            }
        };

        // the lease may have lapsed during a slow attempt; a newer write wins
        if !self
            .deliveries
            .update_delivery(&delivery, claimed_attempt)
            .await?
        {
            warn!(
                delivery_id = %delivery.id,
                attempt = delivery.attempt,
                "Delivery advanced by another worker, result discarded"
            );
            report.contended += 1;
            return Ok(());
        }

        match outcome {
            None => report.skipped_inactive += 1,
            Some(true) => {
                report.retried += 1;
                report.succeeded += 1;
            }
            Some(false) => {
                report.retried += 1;
                report.failed += 1;
            }
        }
        Ok(())
    }

    async fn attempt(
        &self,
        subscription: &WebhookSubscription,
        event: &Event,
    ) -> Result<(), String> {
        match self.transport.deliver(subscription, event).await {
            Ok(result) if result.success => Ok(()),
            Ok(result) => Err(result.error.unwrap_or_else(|| "Unknown error".to_string())),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Admin view over the deliveries of an organization
    pub async fn list_deliveries(
        &self,
        organization_id: &str,
        status: DeliveryStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.deliveries
            .list_by_status(organization_id, status, limit, offset)
            .await
    }

    pub async fn list_subscription_deliveries(
        &self,
        subscription_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.deliveries
            .list_for_subscription(subscription_id, limit, offset)
            .await
    }

    pub async fn delivery_stats(
        &self,
        organization_id: &str,
    ) -> Result<DeliveryStats, WebhookError> {
        self.deliveries
            .delivery_stats(organization_id, self.policy.max_attempts)
            .await
    }
}
