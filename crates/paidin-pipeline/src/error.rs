//! Pipeline Error Types

use paidin_core::CoreError;
use paidin_providers::ProviderError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the orchestrator, queue and dispatcher
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Caller is not entitled to the target resource
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Malformed or missing input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wallet balance below the requested amount
    #[error("Insufficient funds: requested {requested} sats, available {available} sats")]
    InsufficientFunds { requested: u64, available: u64 },

    /// External API failure
    #[error(transparent)]
    Provider(ProviderError),

    /// Webhook signature invalid; the payload was never processed
    #[error("Webhook signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("{0}")]
    NotFound(String),

    /// Bank debit still in flight
    #[error("Payment {0} has not settled yet")]
    NotSettled(String),

    /// Broker failure
    #[error("Queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity: "wallet", id } => Self::WalletNotFound(id),
            err @ CoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            err => Self::Core(err),
        }
    }
}

impl From<ProviderError> for PipelineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::WebhookSignature(msg) => Self::SignatureVerification(msg),
            ProviderError::WebhookParse(msg) => Self::Validation(msg),
            ProviderError::Core(err) => err.into(),
            err => Self::Provider(err),
        }
    }
}

impl PipelineError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_retryable(),
            Self::Core(err) => err.is_retryable(),
            Self::NotSettled(_) | Self::Queue(_) => true,
            _ => false,
        }
    }

    /// Stable machine-readable code
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::SignatureVerification(_) => "SIGNATURE_VERIFICATION_ERROR",
            Self::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotSettled(_) => "NOT_SETTLED",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Core(_) => "INTERNAL_ERROR",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            Self::Authorization(msg) | Self::Validation(msg) => msg.as_str(),
            Self::InsufficientFunds { .. } => "Wallet balance is too low for this request.",
            Self::Provider(err) => err.user_message(),
            Self::SignatureVerification(_) => "Invalid webhook signature.",
            Self::WalletNotFound(_) => "Wallet not found.",
            Self::NotFound(_) => "Resource not found.",
            Self::NotSettled(_) => "The bank transfer has not settled yet.",
            Self::Queue(_) | Self::Core(_) => "An error occurred processing your request.",
        }
    }
}
