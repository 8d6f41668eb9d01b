//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, applying environment overrides,
//! validating all parameters, and providing clear error messages
//! for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::domain::market_hours::parse_hhmm;
use crate::domain::trade::BotMode;

/// Env var overriding `broker.base_url`.
pub const BASE_URL_ENV: &str = "ALPACA_BASE_URL";

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
  let path = path.as_ref();

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let mut config = parse_config(&content)?;

  if let Ok(url) = std::env::var(BASE_URL_ENV) {
    if !url.trim().is_empty() {
      config.broker.base_url = url;
    }
  }

  validate_config(&config)?;

  info!(
    universe = config.strategy.universe.len(),
    strategy = ?config.strategy.kind,
    mode = ?config.bot.mode,
    dry_run = config.bot.dry_run,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse configuration from a TOML string without validation.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  toml::from_str(content).context("Failed to parse config.toml")
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Fractions inside (0, 1]
/// - Ordered RSI and DTE windows
/// - Positive stale-order threshold
/// - Non-empty universe
/// - Live mode pointing at a live endpoint (and paper at paper)
pub fn validate_config(config: &AppConfig) -> Result<()> {
  // Universe validation
  anyhow::ensure!(
    !config.strategy.universe.is_empty(),
    "strategy.universe must list at least one underlying"
  );
  for (i, symbol) in config.strategy.universe.iter().enumerate() {
    anyhow::ensure!(
      !symbol.trim().is_empty() && symbol.chars().all(|c| c.is_ascii_alphanumeric()),
      "strategy.universe[{}] is not a valid ticker: {:?}",
      i,
      symbol
    );
  }

  // Strategy validation
  let s = &config.strategy;
  anyhow::ensure!(
    s.otm_pct > 0.0 && s.otm_pct < 1.0,
    "strategy.otm_pct must be in (0, 1), got {}",
    s.otm_pct
  );
  anyhow::ensure!(
    s.wing_width > 0.0,
    "strategy.wing_width must be positive, got {}",
    s.wing_width
  );
  anyhow::ensure!(
    s.min_dte >= 0 && s.min_dte <= s.target_dte && s.target_dte <= s.max_dte,
    "DTE window must satisfy 0 <= min_dte <= target_dte <= max_dte, got {}/{}/{}",
    s.min_dte,
    s.target_dte,
    s.max_dte
  );
  anyhow::ensure!(s.contracts > 0, "strategy.contracts must be positive");
  anyhow::ensure!(
    s.profit_target_pct > 0.0 && s.profit_target_pct <= 1.0,
    "strategy.profit_target_pct must be in (0, 1], got {}",
    s.profit_target_pct
  );
  anyhow::ensure!(
    s.stop_loss_multiple > 0.0,
    "strategy.stop_loss_multiple must be positive, got {}",
    s.stop_loss_multiple
  );
  anyhow::ensure!(
    s.exit_dte >= 0 && s.exit_dte < s.min_dte,
    "strategy.exit_dte must be in [0, min_dte), got {}",
    s.exit_dte
  );

  // Gate validation
  let g = &config.gates;
  anyhow::ensure!(g.rsi_period > 1, "gates.rsi_period must be > 1");
  anyhow::ensure!(
    g.rsi_floor >= 0.0 && g.rsi_floor < g.rsi_ceiling && g.rsi_ceiling <= 100.0,
    "gates.rsi_floor must be < rsi_ceiling inside [0, 100], got {}..{}",
    g.rsi_floor,
    g.rsi_ceiling
  );
  anyhow::ensure!(
    g.condor_rsi_band > 0.0 && g.condor_rsi_band <= 50.0,
    "gates.condor_rsi_band must be in (0, 50], got {}",
    g.condor_rsi_band
  );
  anyhow::ensure!(
    (-1.0..=1.0).contains(&g.min_sentiment),
    "gates.min_sentiment must be in [-1, 1], got {}",
    g.min_sentiment
  );
  anyhow::ensure!(
    g.condor_max_abs_sentiment > 0.0 && g.condor_max_abs_sentiment <= 1.0,
    "gates.condor_max_abs_sentiment must be in (0, 1], got {}",
    g.condor_max_abs_sentiment
  );
  anyhow::ensure!(
    g.max_position_pct > 0.0 && g.max_position_pct <= 1.0,
    "gates.max_position_pct must be in (0, 1], got {}",
    g.max_position_pct
  );
  anyhow::ensure!(
    g.max_spread_pct > 0.0 && g.max_spread_pct <= 1.0,
    "gates.max_spread_pct must be in (0, 1], got {}",
    g.max_spread_pct
  );
  anyhow::ensure!(g.min_credit >= 0.0, "gates.min_credit must be non-negative");

  // Risk validation
  let r = &config.risk;
  anyhow::ensure!(
    r.max_daily_loss_fraction > 0.0 && r.max_daily_loss_fraction <= 1.0,
    "risk.max_daily_loss_fraction must be in (0, 1], got {}",
    r.max_daily_loss_fraction
  );
  anyhow::ensure!(
    r.max_open_positions > 0,
    "risk.max_open_positions must be positive"
  );
  anyhow::ensure!(
    r.circuit_breaker_losses > 0,
    "risk.circuit_breaker_losses must be positive"
  );

  // Order validation
  anyhow::ensure!(
    config.orders.stale_order_hours > 0.0,
    "orders.stale_order_hours must be positive, got {}",
    config.orders.stale_order_hours
  );
  anyhow::ensure!(
    config.orders.max_orders_per_minute > 0,
    "orders.max_orders_per_minute must be positive"
  );

  // Schedule validation
  parse_hhmm(&config.schedule.entry_after).with_context(|| {
    format!(
      "schedule.entry_after must be HH:MM, got {:?}",
      config.schedule.entry_after
    )
  })?;
  for day in config.schedule.holidays.iter().chain(&config.schedule.half_days) {
    chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
      .with_context(|| format!("Invalid schedule date {day:?} (want YYYY-MM-DD)"))?;
  }
  anyhow::ensure!(
    config.schedule.poll_interval_seconds > 0,
    "schedule.poll_interval_seconds must be positive"
  );

  // API validation
  anyhow::ensure!(
    !config.broker.base_url.is_empty(),
    "broker.base_url must not be empty"
  );
  anyhow::ensure!(
    !config.broker.data_url.is_empty(),
    "broker.data_url must not be empty"
  );
  let paper_url = config.broker.base_url.contains("paper");
  match config.bot.mode {
    BotMode::Paper => anyhow::ensure!(
      paper_url,
      "bot.mode = \"paper\" but broker.base_url is not a paper endpoint: {}",
      config.broker.base_url
    ),
    BotMode::Live => anyhow::ensure!(
      !paper_url,
      "bot.mode = \"live\" but broker.base_url points at paper trading: {}",
      config.broker.base_url
    ),
  }

  anyhow::ensure!(config.lessons.top_k > 0, "lessons.top_k must be positive");

  Ok(())
}
