//! Alpaca Brokerage Adapter
//!
//! Implements the HTTP client for the Alpaca trading and market data
//! REST APIs. Handles authentication, rate limiting, order placement,
//! cancellation, account state and option chain snapshots.
//!
//! Sub-modules:
//! - `auth`: API key header authentication
//! - `client`: HTTP client with rate limiting and retries
//! - `types`: API request/response type definitions
//! - `brokerage`: `Brokerage` port implementation

pub mod auth;
pub mod brokerage;
pub mod client;
pub mod types;

use thiserror::Error;

pub use auth::AlpacaCredentials;
pub use brokerage::AlpacaBrokerage;
pub use client::{AlpacaClient, AlpacaClientConfig};

/// Classified failure of an Alpaca API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("rate limited by Alpaca")]
    RateLimited,
    #[error("Alpaca rejected the API credentials")]
    Unauthorized,
    #[error("Alpaca API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to decode Alpaca response: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Unauthorized | Self::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(BrokerError::RateLimited.is_retryable());
        assert!(BrokerError::Transport("reset".into()).is_retryable());
        assert!(BrokerError::Api { status: 503, body: String::new() }.is_retryable());
        assert!(!BrokerError::Api { status: 422, body: String::new() }.is_retryable());
        assert!(!BrokerError::Unauthorized.is_retryable());
        assert!(!BrokerError::Decode("eof".into()).is_retryable());
    }
}
