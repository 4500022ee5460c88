//! Provider Error Types

use paidin_core::{CoreError, ProviderKind};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Whether repeating the call can succeed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Timeouts, connection failures, 429 and 5xx responses
    Transient,

    /// Rejected requests, malformed responses, expired preconditions
    Terminal,
}

/// Provider-related errors
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-2xx or malformed response from an external API
    #[error("{provider} error: {message}")]
    Api {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
        kind: ProviderErrorKind,
    },

    /// Quote validity window has passed; executing it can never succeed
    #[error("{provider} quote {quote_id} expired")]
    QuoteExpired {
        provider: ProviderKind,
        quote_id: String,
    },

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local record or encryption failure
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProviderError {
    pub fn transient(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Api {
            provider,
            status: None,
            message: message.into(),
            kind: ProviderErrorKind::Transient,
        }
    }

    pub fn terminal(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Api {
            provider,
            status: None,
            message: message.into(),
            kind: ProviderErrorKind::Terminal,
        }
    }

    /// Classify a non-2xx response: 429 and 5xx are transient
    pub fn from_status(provider: ProviderKind, status: u16, body: &str) -> Self {
        let kind = if status == 429 || status >= 500 {
            ProviderErrorKind::Transient
        } else {
            ProviderErrorKind::Terminal
        };
        let detail: String = body.chars().take(200).collect();
        Self::Api {
            provider,
            status: Some(status),
            message: format!("HTTP {status} - {detail}"),
            kind,
        }
    }

    /// Classify a transport-level failure
    pub fn from_reqwest(provider: ProviderKind, err: &reqwest::Error) -> Self {
        if err.is_decode() {
            Self::terminal(provider, format!("malformed response: {err}"))
        } else if err.is_builder() {
            Self::terminal(provider, format!("invalid request: {err}"))
        } else {
            Self::transient(provider, err.to_string())
        }
    }

    /// Downgrade to terminal; used for providers whose calls are never retried
    #[must_use]
    pub fn into_terminal(self) -> Self {
        match self {
            Self::Api {
                provider,
                status,
                message,
                ..
            } => Self::Api {
                provider,
                status,
                message,
                kind: ProviderErrorKind::Terminal,
            },
            other => other,
        }
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Api { kind, .. } => *kind,
            Self::Core(err) if err.is_retryable() => ProviderErrorKind::Transient,
            _ => ProviderErrorKind::Terminal,
        }
    }

    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ProviderErrorKind::Transient)
    }

    pub const fn provider(&self) -> Option<ProviderKind> {
        match self {
            Self::Api { provider, .. } | Self::QuoteExpired { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::Api {
                kind: ProviderErrorKind::Transient,
                ..
            } => "A payment provider is temporarily unavailable. Please try again.",
            Self::Api { .. } => "A payment provider rejected the request.",
            Self::QuoteExpired { .. } => "The exchange quote expired. Please request a new one.",
            Self::WebhookSignature(_) | Self::WebhookParse(_) => "Invalid webhook.",
            Self::Config(_) => "Service configuration error.",
            Self::Core(_) => "An error occurred processing your request.",
        }
    }
}
