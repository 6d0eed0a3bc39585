//! Error types for the PostgreSQL storage backend.

use callsheet_webhooks::WebhookError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for unique constraint violations (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Errors specific to the PostgreSQL storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    /// A row that should exist is missing.
    #[error("Row not found: {0}")]
    NotFound(String),

    /// A column holds a value the domain types cannot represent.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for WebhookError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Config { message } => WebhookError::InvalidConfig(message),
            PostgresError::Database(e) if has_pg_error_code(&e, PG_UNIQUE_VIOLATION) => {
                WebhookError::Storage(format!("duplicate key: {e}"))
            }
            other => WebhookError::Storage(other.to_string()),
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
