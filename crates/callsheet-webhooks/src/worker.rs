use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::engine::{RedriveReport, WebhookEngine};
use crate::error::WebhookError;
use crate::store::{DeliveryStore, SubscriptionStore};

/// Periodically runs redrive passes over an engine
pub struct RedriveWorker<S, D>
where
    S: SubscriptionStore,
    D: DeliveryStore,
{
    engine: Arc<WebhookEngine<S, D>>,
    batch_size: usize,
}

impl<S, D> RedriveWorker<S, D>
where
    S: SubscriptionStore + 'static,
    D: DeliveryStore + 'static,
{
    pub fn new(engine: Arc<WebhookEngine<S, D>>, batch_size: usize) -> Self {
        Self { engine, batch_size }
    }

    pub async fn run_once(&self) -> Result<RedriveReport, WebhookError> {
        self.engine.redrive(self.batch_size).await
    }

    /// Tick every `poll_interval` until `shutdown` turns true or its sender
    /// is dropped. Store errors are logged and the next tick retries.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = poll_interval.as_secs(),
            batch_size = self.batch_size,
            "Webhook redrive worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Error during webhook redrive");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Webhook redrive worker stopped");
    }
}
