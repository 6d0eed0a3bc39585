//! PostgreSQL storage implementation for webhook subscriptions and deliveries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use callsheet_webhooks::{
    DeliveryStats, DeliveryStatus, DeliveryStore, SubscriptionStore, WebhookDelivery,
    WebhookError, WebhookSubscription,
};

use crate::error::PostgresError;

const TABLES_KEY: &str = "webhooks";

const SUBSCRIPTION_COLUMNS: &str =
    "id, organization_id, endpoint_url, event_names, active, secret, created_at";

const DELIVERY_COLUMNS: &str = "id, organization_id, subscription_id, event_name, payload, \
     status, attempt, last_error, delivered_at, created_at, updated_at, claimed_until";

type SubscriptionRow = (
    String,
    String,
    String,
    Vec<String>,
    bool,
    Option<String>,
    DateTime<Utc>,
);

type DeliveryRow = (
    String,
    String,
    String,
    String,
    serde_json::Value,
    String,
    i32,
    Option<String>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

/// PostgreSQL implementation of both webhook stores.
#[derive(Clone)]
pub struct PostgresWebhookStorage {
    pool: PgPool,
    tables_created: Arc<DashSet<String>>,
}

impl PostgresWebhookStorage {
    /// Create a new PostgreSQL webhook storage.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables_created: Arc::new(DashSet::new()),
        }
    }

    /// Ensure the webhook tables exist.
    #[instrument(skip(self))]
    pub async fn ensure_tables(&self) -> Result<(), WebhookError> {
        if self.tables_created.contains(TABLES_KEY) {
            return Ok(());
        }

        sqlx_core::query::query(
            r#"
            CREATE TABLE IF NOT EXISTS _webhook_subscriptions (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                endpoint_url TEXT NOT NULL,
                event_names TEXT[] NOT NULL DEFAULT '{}',
                active BOOLEAN NOT NULL DEFAULT TRUE,
                secret TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        sqlx_core::query::query(
            r#"
            CREATE TABLE IF NOT EXISTS _webhook_deliveries (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                subscription_id TEXT NOT NULL,
                event_name TEXT NOT NULL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 1,
                last_error TEXT,
                delivered_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                claimed_until TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        // One statement per call: prepared statements reject multiple commands
        for index in [
            "CREATE INDEX IF NOT EXISTS idx_webhook_subscriptions_org \
             ON _webhook_subscriptions(organization_id)",
            "CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_failed \
             ON _webhook_deliveries(updated_at) WHERE status = 'failed'",
            "CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_subscription \
             ON _webhook_deliveries(subscription_id, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_org_status \
             ON _webhook_deliveries(organization_id, status, created_at DESC)",
        ] {
            sqlx_core::query::query(index)
                .execute(&self.pool)
                .await
                .map_err(PostgresError::from)?;
        }

        info!("Created webhook tables");
        self.tables_created.insert(TABLES_KEY.to_string());
        Ok(())
    }

    fn time_to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
        DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_else(Utc::now)
    }

    fn time_to_chrono_opt(t: Option<OffsetDateTime>) -> Option<DateTime<Utc>> {
        t.map(Self::time_to_chrono)
    }

    fn chrono_to_time(t: DateTime<Utc>) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(t.timestamp())
            .and_then(|ts| ts.replace_nanosecond(t.timestamp_subsec_nanos()))
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }

    fn chrono_to_time_opt(t: Option<DateTime<Utc>>) -> Option<OffsetDateTime> {
        t.map(Self::chrono_to_time)
    }

    fn limit_offset(limit: usize, offset: usize) -> (i64, i64) {
        (
            i64::try_from(limit).unwrap_or(i64::MAX),
            i64::try_from(offset).unwrap_or(i64::MAX),
        )
    }

    fn attempt_param(attempt: u32) -> i32 {
        i32::try_from(attempt).unwrap_or(i32::MAX)
    }

    fn count_from_row(count: i64) -> u32 {
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn subscription_from_row(row: SubscriptionRow) -> WebhookSubscription {
        let (id, organization_id, endpoint_url, event_names, active, secret, created_at) = row;
        WebhookSubscription {
            id,
            organization_id,
            endpoint_url,
            event_names,
            active,
            secret,
            created_at: Self::chrono_to_time(created_at),
        }
    }

    fn delivery_from_row(row: DeliveryRow) -> Result<WebhookDelivery, WebhookError> {
        let (
            id,
            organization_id,
            subscription_id,
            event_name,
            payload,
            status,
            attempt,
            last_error,
            delivered_at,
            created_at,
            updated_at,
            claimed_until,
        ) = row;

        let attempt = u32::try_from(attempt).map_err(|_| {
            PostgresError::Corrupt(format!("delivery {id} has negative attempt {attempt}"))
        })?;

        Ok(WebhookDelivery {
            status: status.parse::<DeliveryStatus>()?,
            id,
            organization_id,
            subscription_id,
            event_name,
            payload,
            attempt,
            last_error,
            delivered_at: Self::chrono_to_time_opt(delivered_at),
            created_at: Self::chrono_to_time(created_at),
            updated_at: Self::chrono_to_time(updated_at),
            claimed_until: Self::chrono_to_time_opt(claimed_until),
        })
    }

    fn deliveries_from_rows(rows: Vec<DeliveryRow>) -> Result<Vec<WebhookDelivery>, WebhookError> {
        rows.into_iter().map(Self::delivery_from_row).collect()
    }
}

#[async_trait]
impl SubscriptionStore for PostgresWebhookStorage {
    async fn create_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), WebhookError> {
        self.ensure_tables().await?;

        sqlx_core::query::query(
            r#"
            INSERT INTO _webhook_subscriptions (
                id, organization_id, endpoint_url, event_names, active, secret, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.organization_id)
        .bind(&subscription.endpoint_url)
        .bind(&subscription.event_names)
        .bind(subscription.active)
        .bind(&subscription.secret)
        .bind(Self::time_to_chrono(subscription.created_at))
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        debug!(id = %subscription.id, "Stored webhook subscription");
        Ok(())
    }

    async fn get_subscription(
        &self,
        id: &str,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        self.ensure_tables().await?;

        let row: Option<SubscriptionRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM _webhook_subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(row.map(Self::subscription_from_row))
    }

    async fn list_subscriptions(
        &self,
        organization_id: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        self.ensure_tables().await?;

        let rows: Vec<SubscriptionRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM _webhook_subscriptions \
             WHERE organization_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(rows.into_iter().map(Self::subscription_from_row).collect())
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool, WebhookError> {
        self.ensure_tables().await?;

        let result = sqlx_core::query::query(
            "UPDATE _webhook_subscriptions SET active = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DeliveryStore for PostgresWebhookStorage {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), WebhookError> {
        self.ensure_tables().await?;

        sqlx_core::query::query(&format!(
            "INSERT INTO _webhook_deliveries ({DELIVERY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(&delivery.id)
        .bind(&delivery.organization_id)
        .bind(&delivery.subscription_id)
        .bind(&delivery.event_name)
        .bind(&delivery.payload)
        .bind(delivery.status.as_str())
        .bind(Self::attempt_param(delivery.attempt))
        .bind(&delivery.last_error)
        .bind(Self::time_to_chrono_opt(delivery.delivered_at))
        .bind(Self::time_to_chrono(delivery.created_at))
        .bind(Self::time_to_chrono(delivery.updated_at))
        .bind(Self::time_to_chrono_opt(delivery.claimed_until))
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        debug!(id = %delivery.id, status = %delivery.status, "Stored webhook delivery");
        Ok(())
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>, WebhookError> {
        self.ensure_tables().await?;

        let row: Option<DeliveryRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM _webhook_deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        row.map(Self::delivery_from_row).transpose()
    }

    async fn list_failed(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.ensure_tables().await?;
        let (limit, _) = Self::limit_offset(limit, 0);

        let rows: Vec<DeliveryRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM _webhook_deliveries \
             WHERE status = 'failed' \
             ORDER BY (attempt >= $2) ASC, updated_at ASC, created_at ASC, id ASC \
             LIMIT $1"
        ))
        .bind(limit)
        .bind(Self::attempt_param(max_attempts))
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Self::deliveries_from_rows(rows)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.ensure_tables().await?;
        let (limit, offset) = Self::limit_offset(limit, offset);

        let rows: Vec<DeliveryRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM _webhook_deliveries \
             WHERE subscription_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(subscription_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Self::deliveries_from_rows(rows)
    }

    async fn list_by_status(
        &self,
        organization_id: &str,
        status: DeliveryStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.ensure_tables().await?;
        let (limit, offset) = Self::limit_offset(limit, offset);

        let rows: Vec<DeliveryRow> = sqlx_core::query_as::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM _webhook_deliveries \
             WHERE organization_id = $1 AND status = $2 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(organization_id)
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Self::deliveries_from_rows(rows)
    }

    async fn try_claim(
        &self,
        id: &str,
        expected_attempt: u32,
        now: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<bool, WebhookError> {
        self.ensure_tables().await?;

        let result = sqlx_core::query::query(
            r#"
            UPDATE _webhook_deliveries
            SET claimed_until = $4
            WHERE id = $1
              AND attempt = $2
              AND (claimed_until IS NULL OR claimed_until <= $3)
            "#,
        )
        .bind(id)
        .bind(Self::attempt_param(expected_attempt))
        .bind(Self::time_to_chrono(now))
        .bind(Self::time_to_chrono(until))
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_delivery(
        &self,
        delivery: &WebhookDelivery,
        expected_attempt: u32,
    ) -> Result<bool, WebhookError> {
        self.ensure_tables().await?;

        let result = sqlx_core::query::query(
            r#"
            UPDATE _webhook_deliveries
            SET status = $2,
                attempt = $3,
                last_error = $4,
                delivered_at = $5,
                updated_at = $6,
                claimed_until = NULL
            WHERE id = $1 AND attempt = $7
            "#,
        )
        .bind(&delivery.id)
        .bind(delivery.status.as_str())
        .bind(Self::attempt_param(delivery.attempt))
        .bind(&delivery.last_error)
        .bind(Self::time_to_chrono_opt(delivery.delivered_at))
        .bind(Self::time_to_chrono(delivery.updated_at))
        .bind(Self::attempt_param(expected_attempt))
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // zero rows: either the record is gone or a newer attempt was written
        let exists: Option<(String,)> =
            sqlx_core::query_as::query_as("SELECT id FROM _webhook_deliveries WHERE id = $1")
                .bind(&delivery.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(PostgresError::from)?;
        if exists.is_none() {
            return Err(PostgresError::NotFound(format!("delivery {}", delivery.id)).into());
        }

        debug!(id = %delivery.id, expected_attempt, "Stale delivery write rejected");
        Ok(false)
    }

    async fn delivery_stats(
        &self,
        organization_id: &str,
        max_attempts: u32,
    ) -> Result<DeliveryStats, WebhookError> {
        self.ensure_tables().await?;

        let row: (i64, i64, i64) = sqlx_core::query_as::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'success') as success,
                COUNT(*) FILTER (WHERE status = 'failed' AND attempt < $2) as failed,
                COUNT(*) FILTER (WHERE status = 'failed' AND attempt >= $2) as terminal
            FROM _webhook_deliveries
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .bind(Self::attempt_param(max_attempts))
        .fetch_one(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(DeliveryStats {
            success: Self::count_from_row(row.0),
            failed: Self::count_from_row(row.1),
            terminal: Self::count_from_row(row.2),
        })
    }
}
