//! Error types for the ingestion and delivery pipeline.

use thiserror::Error;

/// Errors that can occur while polling, decoding, storing or delivering events.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Unsupported chain: {chain_id}")]
    UnsupportedChain { chain_id: u64 },

    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Webhook delivery failed: {0}")]
    Webhook(String),

    #[error("Retry budget exhausted after {retries} retries")]
    RetryExhausted { retries: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HookError {
    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RpcUnavailable(_) | Self::Webhook(_) | Self::Storage(_)
        )
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
