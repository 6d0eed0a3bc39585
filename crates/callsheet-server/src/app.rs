//! Wiring of config, storage and transport into a running engine.

use std::sync::Arc;

use callsheet_db_postgres::{PostgresWebhookStorage, create_storage, mask_password};
use callsheet_webhooks::{HttpTransport, RedriveWorker, WebhookEngine};
use tracing::info;

use crate::config::AppConfig;

pub type PgWebhookEngine = WebhookEngine<PostgresWebhookStorage, PostgresWebhookStorage>;

pub async fn build_engine(cfg: &AppConfig) -> anyhow::Result<Arc<PgWebhookEngine>> {
    let storage = Arc::new(create_storage(&cfg.storage.postgres).await?);
    let transport = Arc::new(HttpTransport::with_timeout(cfg.request_timeout())?);

    info!(
        database = %mask_password(&cfg.storage.postgres.url),
        max_attempts = cfg.webhooks.max_attempts,
        "Webhook engine ready"
    );

    Ok(Arc::new(WebhookEngine::new(
        storage.clone(),
        storage,
        transport,
        cfg.retry_policy(),
    )))
}

pub fn build_worker(
    engine: Arc<PgWebhookEngine>,
    batch_size: usize,
) -> RedriveWorker<PostgresWebhookStorage, PostgresWebhookStorage> {
    RedriveWorker::new(engine, batch_size)
}
