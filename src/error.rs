//! Error types for the swap daemon

use thiserror::Error;

/// Main error type for the daemon
#[derive(Error, Debug)]
pub enum SwapdError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid swap id {id}: {reason}")]
    InvalidSwapId { id: String, reason: String },

    #[error("Invalid order id {id}: {reason}")]
    InvalidOrderId { id: String, reason: String },

    #[error("{namespace} entry {id} not found")]
    NotFound { namespace: &'static str, id: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Unknown token code {0:#x}")]
    UnknownToken(u32),

    #[error("Amount overflow computing {0}")]
    AmountOverflow(&'static str),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Unrecognized message: {0}")]
    UnrecognizedMessage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwapdError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, SwapdError::Ledger(_) | SwapdError::Dispatch(_))
    }

    /// Check if error means the requested entry does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, SwapdError::NotFound { .. })
    }

    /// Check if error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, SwapdError::Timeout { .. })
    }
}

/// Result type for daemon operations
pub type SwapResult<T> = Result<T, SwapdError>;
