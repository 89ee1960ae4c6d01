//! Error taxonomy for the trading core.
//!
//! Library-internal components (order book, paper engine, edge engine,
//! risk engine) return `Result<T, TradingError>` and never panic. Ambient
//! code (HTTP handlers, `main`, background task bodies) wraps this in
//! `anyhow::Result` via `#[from]`/`.context(...)`, matching the rest of
//! the codebase.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("insufficient liquidity: missing {missing}")]
    InsufficientLiquidity { missing: f64 },

    #[error("incomplete market group: {0}")]
    IncompleteMarketGroup(String),

    #[error("policy rejected: {reason}")]
    PolicyReject { reason: String },

    #[error("authentication required for this endpoint")]
    AuthRequired,

    #[error("transient error, retry={retry}: {message}")]
    Transient { retry: bool, message: String },

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("canceled")]
    Canceled,
}

impl TradingError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        TradingError::InvalidInput(msg.into())
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        TradingError::PolicyReject {
            reason: reason.into(),
        }
    }

    /// Whether local recovery (HTTP retry w/ backoff) applies per the
    /// error taxonomy's disposition column.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradingError::Transient { retry: true, .. })
    }
}

pub type TradingResult<T> = Result<T, TradingError>;
