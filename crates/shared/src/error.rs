//! Error types for the billing mirror pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Billing provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange rate refresh failed: {0}")]
    RateRefresh(String),

    #[error("A sync run is already in progress")]
    SyncInProgress,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Internal(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
