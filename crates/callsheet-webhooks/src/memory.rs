//! In-memory implementation of the subscription and delivery stores.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::WebhookError;
use crate::store::{DeliveryStore, SubscriptionStore};
use crate::types::{DeliveryStats, DeliveryStatus, WebhookDelivery, WebhookSubscription};

#[derive(Debug)]
struct StoredDelivery {
    /// Write sequence, breaks ties between equal `updated_at` values
    seq: u64,
    delivery: WebhookDelivery,
}

#[derive(Debug, Default)]
struct DeliveryTable {
    rows: HashMap<String, StoredDelivery>,
    next_seq: u64,
}

impl DeliveryTable {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Process-local webhook storage.
///
/// Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWebhookStore {
    subscriptions: Arc<RwLock<HashMap<String, WebhookSubscription>>>,
    deliveries: Arc<RwLock<DeliveryTable>>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored delivery, in write order
    pub async fn all_deliveries(&self) -> Vec<WebhookDelivery> {
        let table = self.deliveries.read().await;
        let mut rows: Vec<&StoredDelivery> = table.rows.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.delivery.clone()).collect()
    }

    fn newest_first(mut rows: Vec<WebhookDelivery>) -> Vec<WebhookDelivery> {
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        rows
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryWebhookStore {
    async fn create_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), WebhookError> {
        let mut guard = self.subscriptions.write().await;
        if guard.contains_key(&subscription.id) {
            return Err(WebhookError::Storage(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }
        guard.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(
        &self,
        id: &str,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn list_subscriptions(
        &self,
        organization_id: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let guard = self.subscriptions.read().await;
        let mut subscriptions: Vec<WebhookSubscription> = guard
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(subscriptions)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool, WebhookError> {
        let mut guard = self.subscriptions.write().await;
        match guard.get_mut(id) {
            Some(subscription) => {
                subscription.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl DeliveryStore for InMemoryWebhookStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), WebhookError> {
        let mut table = self.deliveries.write().await;
        if table.rows.contains_key(&delivery.id) {
            return Err(WebhookError::Storage(format!(
                "delivery {} already exists",
                delivery.id
            )));
        }
        let seq = table.bump();
        table.rows.insert(
            delivery.id.clone(),
            StoredDelivery {
                seq,
                delivery: delivery.clone(),
            },
        );
        Ok(())
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>, WebhookError> {
        let table = self.deliveries.read().await;
        Ok(table.rows.get(id).map(|row| row.delivery.clone()))
    }

    async fn list_failed(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let table = self.deliveries.read().await;
        let mut failed: Vec<&StoredDelivery> = table
            .rows
            .values()
            .filter(|row| row.delivery.status == DeliveryStatus::Failed)
            .collect();
        failed.sort_by_key(|row| {
            (
                row.delivery.attempt >= max_attempts,
                row.delivery.updated_at,
                row.seq,
            )
        });
        Ok(failed
            .into_iter()
            .take(limit)
            .map(|row| row.delivery.clone())
            .collect())
    }

    async fn list_for_subscription(
        &self,
        subscription_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let table = self.deliveries.read().await;
        let rows = table
            .rows
            .values()
            .filter(|row| row.delivery.subscription_id == subscription_id)
            .map(|row| row.delivery.clone())
            .collect();
        Ok(Self::newest_first(rows)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn list_by_status(
        &self,
        organization_id: &str,
        status: DeliveryStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let table = self.deliveries.read().await;
        let rows = table
            .rows
            .values()
            .filter(|row| {
                row.delivery.organization_id == organization_id && row.delivery.status == status
            })
            .map(|row| row.delivery.clone())
            .collect();
        Ok(Self::newest_first(rows)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_attempt: u32,
        now: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<bool, WebhookError> {
        let mut table = self.deliveries.write().await;
        let Some(row) = table.rows.get_mut(id) else {
            return Ok(false);
        };
        let delivery = &mut row.delivery;
        if delivery.attempt != expected_attempt {
            return Ok(false);
        }
        if delivery.claimed_until.is_some_and(|claimed| claimed > now) {
            return Ok(false);
        }
        delivery.claimed_until = Some(until);
        Ok(true)
    }

    async fn update_delivery(
        &self,
        delivery: &WebhookDelivery,
        expected_attempt: u32,
    ) -> Result<bool, WebhookError> {
        let mut table = self.deliveries.write().await;
        let Some(current) = table.rows.get(&delivery.id) else {
            return Err(WebhookError::Storage(format!(
                "delivery {} not found",
                delivery.id
            )));
        };
        if current.delivery.attempt != expected_attempt {
            return Ok(false);
        }
        let seq = table.bump();
        let mut stored = delivery.clone();
        stored.claimed_until = None;
        table.rows.insert(
            delivery.id.clone(),
            StoredDelivery {
                seq,
                delivery: stored,
            },
        );
        Ok(true)
    }

    async fn delivery_stats(
        &self,
        organization_id: &str,
        max_attempts: u32,
    ) -> Result<DeliveryStats, WebhookError> {
        let table = self.deliveries.read().await;
        let mut stats = DeliveryStats::default();
        for row in table.rows.values() {
            let delivery = &row.delivery;
            if delivery.organization_id != organization_id {
                continue;
            }
            match delivery.status {
                DeliveryStatus::Success => stats.success += 1,
                DeliveryStatus::Failed if delivery.attempt >= max_attempts => stats.terminal += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
