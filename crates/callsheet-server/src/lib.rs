pub mod app;
pub mod config;
pub mod observability;

pub use app::{PgWebhookEngine, build_engine, build_worker};
pub use config::AppConfig;
