#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use callsheet_webhooks::{
    DeliveryStatus, DeliveryStore, DeliveryTransport, Event, FakeTimeSource,
    InMemoryWebhookStore, NewSubscription, RetryPolicy, SendResult, TimeSource, WebhookDelivery,
    WebhookEngine, WebhookError, WebhookSubscription,
};
use parking_lot::Mutex;
use serde_json::json;
use time::OffsetDateTime;
use time::macros::datetime;

pub const T0: OffsetDateTime = datetime!(2026-03-02 09:00 UTC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Fail,
    Error,
}

/// Transport double recording every call
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<(String, Event)>>,
    behaviours: Mutex<HashMap<String, Behaviour>>,
}

impl RecordingTransport {
    pub fn set_behaviour(&self, subscription_id: &str, behaviour: Option<Behaviour>) {
        let mut behaviours = self.behaviours.lock();
        match behaviour {
            Some(b) => behaviours.insert(subscription_id.to_string(), b),
            None => behaviours.remove(subscription_id),
        };
    }

    pub fn calls(&self) -> Vec<(String, Event)> {
        self.calls.lock().clone()
    }

    pub fn called_subscriptions(&self) -> HashSet<String> {
        self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        event: &Event,
    ) -> Result<SendResult, WebhookError> {
        self.calls
            .lock()
            .push((subscription.id.clone(), event.clone()));

        let behaviour = self.behaviours.lock().get(&subscription.id).copied();
        match behaviour {
            None => Ok(SendResult::ok()),
            Some(Behaviour::Fail) => Ok(SendResult::failed("HTTP 503: unavailable")),
            Some(Behaviour::Error) => Err(WebhookError::SendFailed("connection refused".into())),
        }
    }
}

pub struct Harness {
    pub store: Arc<InMemoryWebhookStore>,
    pub transport: Arc<RecordingTransport>,
    pub clock: FakeTimeSource,
    pub engine: WebhookEngine<InMemoryWebhookStore, InMemoryWebhookStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        let store = Arc::new(InMemoryWebhookStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let clock = FakeTimeSource::new(T0);
        let engine = WebhookEngine::new(store.clone(), store.clone(), transport.clone(), policy)
            .with_time_source(Arc::new(clock.clone()));

        Self {
            store,
            transport,
            clock,
            engine,
        }
    }

    pub async fn subscribe(
        &self,
        organization_id: &str,
        event_names: &[&str],
    ) -> WebhookSubscription {
        self.engine
            .create_subscription(NewSubscription {
                organization_id: organization_id.to_string(),
                endpoint_url: "https://hooks.example.com/callsheet".to_string(),
                event_names: event_names.iter().map(|n| n.to_string()).collect(),
                secret: None,
            })
            .await
            .expect("subscription created")
    }

    pub fn event(&self, name: &str) -> Event {
        Event::new(name, json!({"orderId": 42}), self.clock.now())
    }

    /// Store a failed delivery directly, bypassing dispatch
    pub async fn seed_failed(
        &self,
        subscription: &WebhookSubscription,
        attempt: u32,
        delivered_at: Option<OffsetDateTime>,
    ) -> WebhookDelivery {
        let delivery = WebhookDelivery {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: subscription.organization_id.clone(),
            subscription_id: subscription.id.clone(),
            event_name: "order.created".to_string(),
            payload: json!({"orderId": 42}),
            status: DeliveryStatus::Failed,
            attempt,
            last_error: Some("HTTP 503: unavailable".to_string()),
            delivered_at,
            created_at: self.clock.now(),
            updated_at: self.clock.now(),
            claimed_until: None,
        };
        self.store.insert_delivery(&delivery).await.unwrap();
        delivery
    }

    pub async fn reload(&self, delivery: &WebhookDelivery) -> WebhookDelivery {
        self.store
            .get_delivery(&delivery.id)
            .await
            .unwrap()
            .expect("delivery exists")
    }
}
