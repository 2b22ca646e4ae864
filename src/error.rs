//! Error types for the swap engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the swap engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // Capital / execution errors
    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("Slippage exceeded: max {expected}%, realized {actual}%")]
    SlippageExceeded { expected: f64, actual: f64 },

    #[error("Quote expired: {0}")]
    QuoteExpired(String),

    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    #[error("Rate limited by {0}")]
    RateLimited(String),

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    // Remote API errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    // Strategy / position errors
    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Trade size rejected: {0}")]
    TradeSizeRejected(String),

    // Plumbing
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Transient errors that the caller retries with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NetworkTimeout(_) | Error::RateLimited(_) | Error::QuoteExpired(_)
        )
    }

    /// Errors that abort a single execution but never fault a strategy
    pub fn is_capital_fault(&self) -> bool {
        matches!(
            self,
            Error::InsufficientBalance { .. } | Error::SlippageExceeded { .. }
        )
    }

    /// Stable code recorded on failed execution results
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConfigInvalid(_) => "CONFIG_INVALID",
            Error::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Error::SlippageExceeded { .. } => "SLIPPAGE_EXCEEDED",
            Error::QuoteExpired(_) => "QUOTE_EXPIRED",
            Error::NetworkTimeout(_) => "NETWORK_TIMEOUT",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::TransactionReverted(_) => "TRANSACTION_REVERTED",
            Error::Http(_) => "HTTP_ERROR",
            Error::Api { .. } => "API_ERROR",
            Error::Signing(_) => "SIGNING_FAILED",
            Error::StrategyNotFound(_) => "STRATEGY_NOT_FOUND",
            Error::PositionNotFound(_) => "NO_POSITION",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::TradeSizeRejected(_) => "TRADE_SIZE_REJECTED",
            Error::ChannelClosed(_) => "CHANNEL_CLOSED",
            Error::Persistence(_) => "PERSISTENCE_ERROR",
            Error::Serialization(_) | Error::Deserialization(_) => "SERDE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) | Error::Anyhow(_) => "EXECUTION_ERROR",
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors; timeouts are transient
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::NetworkTimeout(0)
        } else if e.is_decode() {
            Error::Deserialization(e.to_string())
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                Error::RateLimited(e.url().map(|u| u.to_string()).unwrap_or_default())
            } else {
                Error::Api {
                    status: status.as_u16(),
                    message: e.to_string(),
                }
            }
        } else {
            Error::Http(e.to_string())
        }
    }
}
