//! Error types shared across the workspace.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CouponClawError>;

/// Top-level error for store, config and wiring failures.
#[derive(Debug, Error)]
pub enum CouponClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure talking to the benefit provider.
///
/// `Auth` and `Network` must stay distinguishable: the first pauses an
/// account, the second is left for the next scheduled run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("credential rejected: {0}")]
    Auth(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("unexpected provider response: {0}")]
    Protocol(String),
}

impl ProviderError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }
}

/// A single notification channel failed to deliver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("{channel}: delivery failed: {reason}")]
    Delivery { channel: String, reason: String },

    #[error("{channel}: timed out after {secs}s")]
    Timeout { channel: String, secs: u64 },

    #[error("{channel}: no destination configured")]
    NoDestination { channel: String },
}
