//! Configuration Module - TOML-based Bot Configuration
//!
//! Loads and validates configuration from `config.toml` with
//! environment variable overrides via `.env` files.
//! Thresholds, universe and schedule live here - nothing about
//! gates, exits or the session clock is hardcoded in the domain layer.

pub mod loader;

use serde::Deserialize;

use crate::domain::strategy::{StrategyKind, StrategyParams};
use crate::domain::trade::BotMode;

/// Top-level bot configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the bot begins operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Bot identity and metadata.
  pub bot: BotConfig,
  /// Brokerage (Alpaca) endpoints.
  pub broker: BrokerConfig,
  /// LLM advisor settings.
  #[serde(default)]
  pub llm: LlmConfig,
  /// Universe and candidate construction.
  pub strategy: StrategyConfig,
  /// Gate thresholds.
  pub gates: GateConfig,
  /// Risk management parameters.
  pub risk: RiskConfig,
  /// Order lifecycle settings.
  #[serde(default)]
  pub orders: OrderConfig,
  /// Market session and job schedule.
  #[serde(default)]
  pub schedule: ScheduleConfig,
  /// Lessons-learned store.
  #[serde(default)]
  pub lessons: LessonsConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Bot identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
  /// Human-readable bot name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Paper or live account.
  #[serde(default = "default_mode")]
  pub mode: BotMode,
  /// Enable dry-run mode (gates run, no orders sent).
  #[serde(default)]
  pub dry_run: bool,
}

/// Brokerage API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
  /// Trading REST base URL.
  #[serde(default = "default_broker_url")]
  pub base_url: String,
  /// Market data REST base URL.
  #[serde(default = "default_data_url")]
  pub data_url: String,
  /// Options data feed ("indicative" or "opra").
  #[serde(default = "default_options_feed")]
  pub options_feed: String,
  /// Stock data feed ("iex" or "sip").
  #[serde(default = "default_stock_feed")]
  pub stock_feed: String,
  /// Request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Maximum retries on transient errors.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Client-side request budget per minute.
  #[serde(default = "default_requests_per_minute")]
  pub requests_per_minute: u32,
}

/// LLM advisor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
  /// Disable to run the sentiment gate with a neutral advisor.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Messages API base URL.
  #[serde(default = "default_llm_url")]
  pub base_url: String,
  /// Model identifier.
  #[serde(default = "default_llm_model")]
  pub model: String,
  /// Completion token cap.
  #[serde(default = "default_llm_max_tokens")]
  pub max_tokens: u32,
  /// Request timeout in seconds.
  #[serde(default = "default_llm_timeout")]
  pub timeout_seconds: u64,
}

/// Universe and candidate construction.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
  /// Underlyings scanned each trade cycle.
  pub universe: Vec<String>,
  /// Strategy opened on each underlying.
  #[serde(default = "default_strategy_kind")]
  pub kind: StrategyKind,
  /// Short strike distance from spot (0.05 = 5% OTM).
  #[serde(default = "default_otm_pct")]
  pub otm_pct: f64,
  /// Iron condor wing width in strike dollars.
  #[serde(default = "default_wing_width")]
  pub wing_width: f64,
  /// Preferred days to expiry.
  #[serde(default = "default_target_dte")]
  pub target_dte: i64,
  /// Minimum days to expiry.
  #[serde(default = "default_min_dte")]
  pub min_dte: i64,
  /// Maximum days to expiry.
  #[serde(default = "default_max_dte")]
  pub max_dte: i64,
  /// Contracts per order.
  #[serde(default = "default_contracts")]
  pub contracts: u32,
  /// Close shorts at this fraction of credit captured.
  #[serde(default = "default_profit_target")]
  pub profit_target_pct: f64,
  /// Close shorts once loss reaches this multiple of credit.
  #[serde(default = "default_stop_loss_multiple")]
  pub stop_loss_multiple: f64,
  /// Close everything at or below this many days to expiry.
  #[serde(default = "default_exit_dte")]
  pub exit_dte: i64,
  /// Cap on new orders in a single cycle.
  #[serde(default = "default_max_new_trades")]
  pub max_new_trades_per_cycle: usize,
}

impl StrategyConfig {
  /// Candidate construction parameters.
  pub fn params(&self) -> StrategyParams {
    StrategyParams {
      otm_pct: self.otm_pct,
      wing_width: self.wing_width,
      target_dte: self.target_dte,
      min_dte: self.min_dte,
      max_dte: self.max_dte,
      contracts: self.contracts,
    }
  }
}

/// Gate thresholds (momentum → sentiment → risk → execution).
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
  /// RSI lookback.
  #[serde(default = "default_rsi_period")]
  pub rsi_period: usize,
  /// Reject puts below this RSI.
  #[serde(default = "default_rsi_floor")]
  pub rsi_floor: f64,
  /// Reject puts above this RSI.
  #[serde(default = "default_rsi_ceiling")]
  pub rsi_ceiling: f64,
  /// Half-width of the RSI band around 50 for iron condors.
  #[serde(default = "default_condor_rsi_band")]
  pub condor_rsi_band: f64,
  /// Minimum sentiment score for cash-secured puts.
  #[serde(default = "default_min_sentiment")]
  pub min_sentiment: f64,
  /// Maximum |sentiment| for iron condors.
  #[serde(default = "default_condor_max_abs_sentiment")]
  pub condor_max_abs_sentiment: f64,
  /// Maximum collateral as a fraction of options buying power.
  pub max_position_pct: f64,
  /// Maximum bid-ask spread as a fraction of mid.
  #[serde(default = "default_max_spread_pct")]
  pub max_spread_pct: f64,
  /// Minimum net credit per share.
  #[serde(default = "default_min_credit")]
  pub min_credit: f64,
}

/// Risk management configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
  /// Maximum daily loss as fraction of equity (e.g., 0.02 = 2%).
  pub max_daily_loss_fraction: f64,
  /// Maximum concurrently open option positions (legs).
  pub max_open_positions: usize,
  /// Circuit breaker: consecutive losses before pause.
  #[serde(default = "default_circuit_breaker")]
  pub circuit_breaker_losses: u32,
  /// Cool-down period after circuit breaker (seconds).
  #[serde(default = "default_cooldown")]
  pub cooldown_seconds: u64,
  /// Equity below which the PDT rule applies.
  #[serde(default = "default_pdt_threshold")]
  pub pdt_equity_threshold: f64,
  /// Day trades allowed in the rolling window before blocking.
  #[serde(default = "default_max_day_trades")]
  pub max_day_trades: u32,
}

/// Order lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
  /// Open orders older than this are cancelled by cleanup.
  #[serde(default = "default_stale_hours")]
  pub stale_order_hours: f64,
  /// Maximum orders per minute.
  #[serde(default = "default_max_orders")]
  pub max_orders_per_minute: u32,
  /// Minimum interval between order submissions (milliseconds).
  #[serde(default = "default_min_interval")]
  pub min_interval_ms: u64,
  /// Cancel working orders when the daemon stops.
  #[serde(default = "default_true")]
  pub cancel_on_shutdown: bool,
}

/// Market session and job schedule (Eastern time).
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
  /// Earliest entry time, "HH:MM" Eastern.
  #[serde(default = "default_entry_after")]
  pub entry_after: String,
  /// Daemon tick interval.
  #[serde(default = "default_poll_interval")]
  pub poll_interval_seconds: u64,
  /// Full-day market holidays (YYYY-MM-DD).
  #[serde(default)]
  pub holidays: Vec<String>,
  /// 13:00 ET early-close days (YYYY-MM-DD).
  #[serde(default)]
  pub half_days: Vec<String>,
}

/// Lessons store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LessonsConfig {
  /// JSONL file holding lessons.
  #[serde(default = "default_lessons_path")]
  pub path: String,
  /// Lessons retrieved per decision.
  #[serde(default = "default_top_k")]
  pub top_k: usize,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for state snapshot and JSONL journals.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      base_url: default_llm_url(),
      model: default_llm_model(),
      max_tokens: default_llm_max_tokens(),
      timeout_seconds: default_llm_timeout(),
    }
  }
}

impl Default for OrderConfig {
  fn default() -> Self {
    Self {
      stale_order_hours: default_stale_hours(),
      max_orders_per_minute: default_max_orders(),
      min_interval_ms: default_min_interval(),
      cancel_on_shutdown: default_true(),
    }
  }
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      entry_after: default_entry_after(),
      poll_interval_seconds: default_poll_interval(),
      holidays: Vec::new(),
      half_days: Vec::new(),
    }
  }
}

impl Default for LessonsConfig {
  fn default() -> Self {
    Self {
      path: default_lessons_path(),
      top_k: default_top_k(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_mode() -> BotMode {
  BotMode::Paper
}

fn default_true() -> bool {
  true
}

fn default_broker_url() -> String {
  "https://paper-api.alpaca.markets".to_string()
}

fn default_data_url() -> String {
  "https://data.alpaca.markets".to_string()
}

fn default_options_feed() -> String {
  "indicative".to_string()
}

fn default_stock_feed() -> String {
  "iex".to_string()
}

fn default_timeout() -> u64 {
  30
}

fn default_max_retries() -> u32 {
  3
}

fn default_requests_per_minute() -> u32 {
  180
}

fn default_llm_url() -> String {
  "https://api.anthropic.com".to_string()
}

fn default_llm_model() -> String {
  "claude-sonnet-4-5".to_string()
}

fn default_llm_max_tokens() -> u32 {
  512
}

fn default_llm_timeout() -> u64 {
  60
}

fn default_strategy_kind() -> StrategyKind {
  StrategyKind::CashSecuredPut
}

fn default_otm_pct() -> f64 {
  0.05
}

fn default_wing_width() -> f64 {
  5.0
}

fn default_target_dte() -> i64 {
  30
}

fn default_min_dte() -> i64 {
  21
}

fn default_max_dte() -> i64 {
  45
}

fn default_contracts() -> u32 {
  1
}

fn default_profit_target() -> f64 {
  0.5
}

fn default_stop_loss_multiple() -> f64 {
  2.0
}

fn default_exit_dte() -> i64 {
  7
}

fn default_max_new_trades() -> usize {
  1
}

fn default_rsi_period() -> usize {
  14
}

fn default_rsi_floor() -> f64 {
  30.0
}

fn default_rsi_ceiling() -> f64 {
  70.0
}

fn default_condor_rsi_band() -> f64 {
  15.0
}

fn default_min_sentiment() -> f64 {
  -0.2
}

fn default_condor_max_abs_sentiment() -> f64 {
  0.5
}

fn default_max_spread_pct() -> f64 {
  0.10
}

fn default_min_credit() -> f64 {
  0.30
}

fn default_circuit_breaker() -> u32 {
  3
}

fn default_cooldown() -> u64 {
  86_400
}

fn default_pdt_threshold() -> f64 {
  25_000.0
}

fn default_max_day_trades() -> u32 {
  3
}

fn default_stale_hours() -> f64 {
  4.0
}

fn default_max_orders() -> u32 {
  20
}

fn default_min_interval() -> u64 {
  250
}

fn default_entry_after() -> String {
  "10:00".to_string()
}

fn default_poll_interval() -> u64 {
  300
}

fn default_lessons_path() -> String {
  "data/lessons.jsonl".to_string()
}

fn default_top_k() -> usize {
  5
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}

fn default_data_dir() -> String {
  "data".to_string()
}
