//! Webhook event delivery for Callsheet organizations.
//!
//! Domain actions hand an [`Event`] to [`WebhookEngine::dispatch`], which fans
//! it out to every active, interested [`WebhookSubscription`] of the
//! organization and records one [`WebhookDelivery`] per attempt. Failed
//! deliveries are advanced by [`WebhookEngine::redrive`] under an exponential
//! backoff [`RetryPolicy`] with a hard attempt cutoff. The engine never
//! schedules itself; [`RedriveWorker`] or an external cron drives redrive
//! passes.

pub mod engine;
pub mod error;
pub mod memory;
pub mod policy;
pub mod store;
pub mod time_source;
pub mod transport;
pub mod types;
pub mod worker;

pub use engine::{RedriveReport, WebhookEngine};
pub use error::WebhookError;
pub use memory::InMemoryWebhookStore;
pub use policy::{DeliveryState, RetryPolicy};
pub use store::{DeliveryStore, SubscriptionStore};
pub use time_source::{FakeTimeSource, SystemTimeSource, TimeSource};
pub use transport::{DeliveryTransport, HttpTransport, SendResult};
pub use types::*;
pub use worker::RedriveWorker;
