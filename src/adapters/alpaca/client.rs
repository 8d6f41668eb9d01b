//! Alpaca HTTP Client - Rate-limited REST API Client
//!
//! Wraps reqwest with a request budget, a concurrency cap, retries and
//! authentication for the Alpaca trading and market data APIs.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::BrokerError;
use super::auth::AlpacaCredentials;
use crate::config::BrokerConfig;

/// Which Alpaca host a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
  /// Trading API (account, positions, orders).
  Trading,
  /// Market data API (bars, trades, option snapshots).
  Data,
}

/// Configuration for the Alpaca HTTP client.
#[derive(Debug, Clone)]
pub struct AlpacaClientConfig {
  /// Trading API base URL.
  pub trading_url: String,
  /// Market data API base URL.
  pub data_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
  /// Client-side request budget.
  pub requests_per_minute: u32,
}

impl Default for AlpacaClientConfig {
  fn default() -> Self {
    Self {
      trading_url: "https://paper-api.alpaca.markets".to_string(),
      data_url: "https://data.alpaca.markets".to_string(),
      timeout: Duration::from_secs(30),
      max_concurrent: 8,
      max_retries: 3,
      retry_base_delay: Duration::from_millis(250),
      requests_per_minute: 180,
    }
  }
}

impl From<&BrokerConfig> for AlpacaClientConfig {
  fn from(config: &BrokerConfig) -> Self {
    Self {
      trading_url: config.base_url.trim_end_matches('/').to_string(),
      data_url: config.data_url.trim_end_matches('/').to_string(),
      timeout: Duration::from_secs(config.timeout_seconds),
      max_retries: config.max_retries,
      requests_per_minute: config.requests_per_minute,
      ..Self::default()
    }
  }
}

/// Rate-limited HTTP client for the Alpaca APIs.
pub struct AlpacaClient {
  /// Underlying HTTP client.
  http: Client,
  /// API key headers.
  credentials: AlpacaCredentials,
  /// Client configuration.
  config: AlpacaClientConfig,
  /// Concurrency limiter.
  semaphore: Arc<Semaphore>,
  /// Request budget shared by both hosts.
  limiter: DefaultDirectRateLimiter,
}

impl AlpacaClient {
  /// Create a new Alpaca client.
  pub fn new(
    credentials: AlpacaCredentials,
    config: AlpacaClientConfig,
  ) -> anyhow::Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    let limiter = RateLimiter::direct(Quota::per_minute(per_minute));
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

    Ok(Self {
      http,
      credentials,
      config,
      semaphore,
      limiter,
    })
  }

  fn url(&self, api: Api, path: &str) -> String {
    let base = match api {
      Api::Trading => &self.config.trading_url,
      Api::Data => &self.config.data_url,
    };
    format!("{base}{path}")
  }

  /// GET and decode a JSON body.
  pub async fn get_json<T: DeserializeOwned>(
    &self,
    api: Api,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<T, BrokerError> {
    let request = self.http.get(self.url(api, path)).query(query);
    let response = self.execute_with_retry(request, "GET", path).await?;
    decode(response).await
  }

  /// POST a JSON body and decode the JSON reply.
  pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    &self,
    api: Api,
    path: &str,
    body: &B,
  ) -> Result<T, BrokerError> {
    let request = self.http.post(self.url(api, path)).json(body);
    let response = self.execute_with_retry(request, "POST", path).await?;
    decode(response).await
  }

  /// DELETE; success bodies are ignored.
  pub async fn delete(&self, api: Api, path: &str) -> Result<(), BrokerError> {
    let request = self.http.delete(self.url(api, path));
    self.execute_with_retry(request, "DELETE", path).await?;
    Ok(())
  }

  /// Execute request with authentication, rate limiting, and retries.
  async fn execute_with_retry(
    &self,
    request: RequestBuilder,
    method: &str,
    path: &str,
  ) -> Result<Response, BrokerError> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .map_err(|_| BrokerError::Transport("request semaphore closed".to_string()))?;

    let mut last_error = BrokerError::Transport("no attempt made".to_string());

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis(), method, path, "Retrying request");
        sleep(delay).await;
      }

      self.limiter.until_ready().await;

      let req = request
        .try_clone()
        .ok_or_else(|| BrokerError::Transport("request body is not cloneable".to_string()))?;

      let error = match self.credentials.apply(req).send().await {
        Ok(response) if response.status().is_success() => return Ok(response),
        Ok(response) => classify(response).await,
        Err(e) => BrokerError::Transport(e.to_string()),
      };

      if !error.is_retryable() {
        return Err(error);
      }
      warn!(error = %error, attempt, method, path, "Alpaca request failed");
      last_error = error;
    }

    Err(last_error)
  }

  /// Check if the trading API is reachable with these credentials.
  pub async fn health_check(&self) -> bool {
    let request = self.http.get(self.url(Api::Trading, "/v2/clock"));
    match self.credentials.apply(request).send().await {
      Ok(response) => response.status().is_success(),
      Err(_) => false,
    }
  }
}

/// Map a non-success response to a `BrokerError`.
async fn classify(response: Response) -> BrokerError {
  match response.status() {
    StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimited,
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Unauthorized,
    status => BrokerError::Api {
      status: status.as_u16(),
      body: response.text().await.unwrap_or_default(),
    },
  }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BrokerError> {
  let text = response
    .text()
    .await
    .map_err(|e| BrokerError::Transport(e.to_string()))?;
  serde_json::from_str(&text).map_err(|e| BrokerError::Decode(e.to_string()))
}
