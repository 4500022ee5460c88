//! Error Types

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A non-failed ledger entry already holds this key
    #[error("Duplicate ledger entry: {0}")]
    DuplicateLedgerEntry(String),

    /// Record already exists under a unique key
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Record fails a structural invariant
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Ledger status change not allowed by the state machine
    #[error("Invalid transaction transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Backend storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
