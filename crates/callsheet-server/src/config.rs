use std::time::Duration;

use callsheet_db_postgres::PostgresConfig;
use callsheet_webhooks::RetryPolicy;
use callsheet_webhooks::policy::{
    DEFAULT_CLAIM_TTL_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MINUTES,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub webhooks: WebhookSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Webhook validations
        let w = &self.webhooks;
        if w.redrive_batch_size == 0 {
            return Err("webhooks.redrive_batch_size must be > 0".into());
        }
        if w.redrive_interval_secs == 0 {
            return Err("webhooks.redrive_interval_secs must be > 0".into());
        }
        if w.request_timeout_ms == 0 {
            return Err("webhooks.request_timeout_ms must be > 0".into());
        }
        self.retry_policy()
            .validate()
            .map_err(|e| format!("webhooks: {e}"))?;
        // a claim must outlive the transport call it guards
        let claim_ttl_ms = u64::try_from(w.claim_ttl_secs)
            .unwrap_or(0)
            .saturating_mul(1000);
        if claim_ttl_ms <= w.request_timeout_ms {
            return Err(format!(
                "webhooks.claim_ttl_secs ({}s) must exceed webhooks.request_timeout_ms ({}ms)",
                w.claim_ttl_secs, w.request_timeout_ms
            ));
        }
        // Storage validation
        let pg = &self.storage.postgres;
        if pg.url.trim().is_empty() {
            return Err("storage.postgres.url must not be empty".into());
        }
        if pg.pool_size == 0 {
            return Err("storage.postgres.pool_size must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.webhooks.max_attempts,
            max_backoff_minutes: self.webhooks.max_backoff_minutes,
            claim_ttl_secs: self.webhooks.claim_ttl_secs,
        }
    }

    pub fn redrive_interval(&self) -> Duration {
        Duration::from_secs(self.webhooks.redrive_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.webhooks.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Attempt cutoff; also read from `WEBHOOK_MAX_ATTEMPTS`
    pub max_attempts: u32,
    pub max_backoff_minutes: i64,
    /// Failed deliveries examined per redrive pass
    pub redrive_batch_size: usize,
    pub redrive_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub claim_ttl_secs: i64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_backoff_minutes: DEFAULT_MAX_BACKOFF_MINUTES,
            redrive_batch_size: 20,
            redrive_interval_secs: 120,
            request_timeout_ms: 10_000,
            claim_ttl_secs: DEFAULT_CLAIM_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::env;
    use std::path::PathBuf;

    /// Default configuration file, looked up in the working directory
    pub const DEFAULT_CONFIG_PATH: &str = "callsheet.toml";

    /// Standalone override for the attempt cutoff
    pub const MAX_ATTEMPTS_ENV: &str = "WEBHOOK_MAX_ATTEMPTS";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., CALLSHEET__WEBHOOKS__REDRIVE_BATCH_SIZE=50
        builder = builder.add_source(
            Environment::with_prefix("CALLSHEET")
                .try_parsing(true)
                .separator("__"),
        );
        let max_attempts = env::var(MAX_ATTEMPTS_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|e| format!("{MAX_ATTEMPTS_ENV}: {e}"))
            })
            .transpose()?;
        builder = builder
            .set_override_option("webhooks.max_attempts", max_attempts)
            .map_err(|e| format!("config build error: {e}"))?;
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}
