//! Alpaca Authentication - API Key Headers
//!
//! Every trading and data request carries the key ID and secret as
//! headers. Credentials come from environment variables
//! (ALPACA_API_KEY, ALPACA_SECRET_KEY), usually via `.env`.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::RequestBuilder;

/// Env var holding the API key ID.
pub const API_KEY_ENV: &str = "ALPACA_API_KEY";
/// Env var holding the API secret.
pub const SECRET_KEY_ENV: &str = "ALPACA_SECRET_KEY";

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

/// Alpaca API credentials.
///
/// `Debug` prints a redacted form; the secret never reaches logs.
#[derive(Clone)]
pub struct AlpacaCredentials {
    /// API key ID from ALPACA_API_KEY.
    key_id: String,
    /// API secret from ALPACA_SECRET_KEY (sent only as a header).
    secret_key: String,
}

impl AlpacaCredentials {
    pub fn new(key_id: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let key_id = key_id.into();
        let secret_key = secret_key.into();
        anyhow::ensure!(!key_id.trim().is_empty(), "{API_KEY_ENV} is empty");
        anyhow::ensure!(!secret_key.trim().is_empty(), "{SECRET_KEY_ENV} is empty");
        Ok(Self { key_id, secret_key })
    }

    /// Load credentials from environment variables.
    ///
    /// Required env vars: ALPACA_API_KEY, ALPACA_SECRET_KEY.
    /// These MUST be set in `.env` (never committed to git).
    pub fn from_env() -> Result<Self> {
        let key_id = std::env::var(API_KEY_ENV).with_context(|| format!("{API_KEY_ENV} not set"))?;
        let secret_key =
            std::env::var(SECRET_KEY_ENV).with_context(|| format!("{SECRET_KEY_ENV} not set"))?;
        Self::new(key_id, secret_key)
    }

    /// Get the key ID (safe to log).
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Attach the authentication headers to a request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(KEY_HEADER, &self.key_id)
            .header(SECRET_HEADER, &self.secret_key)
    }
}

impl fmt::Debug for AlpacaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlpacaCredentials")
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
