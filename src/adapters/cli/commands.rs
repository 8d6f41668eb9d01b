//! CLI Commands - Argument Types and Handlers
//!
//! Each scheduled job has a one-shot subcommand meant for cron; `run`
//! keeps them all on the in-process scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::services::Services;
use crate::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use crate::config::AppConfig;
use crate::domain::indicators::{rsi, sma};
use crate::domain::lesson::{Lesson, Severity};
use crate::ports::brokerage::{AccountSnapshot, BrokerPosition, Brokerage};
use crate::ports::lessons::LessonStore;
use crate::ports::repository::{BotStateSnapshot, Repository};
use crate::usecases::order_manager::OrderManager;
use crate::usecases::position_manager::PositionManager;
use crate::usecases::scheduler::{Jobs, Scheduler, stale_threshold};
use crate::usecases::state_sync::StateSync;
use crate::usecases::trade_cycle::TradeCycle;

/// How long `run` waits for the scheduler after SIGINT.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Gate-filtered options trading bot for an Alpaca account
#[derive(Parser, Debug)]
#[command(
    name = "options-gate-bot",
    version = env!("CARGO_PKG_VERSION"),
    about = "Gate-filtered options trading bot (cash-secured puts / iron condors)",
    long_about = "Builds option candidates from live chains, filters them through momentum, \
                  sentiment, risk and execution gates, and manages exits on an Alpaca account."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pub pretty: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler with health and metrics servers until Ctrl-C
    Run,

    /// One trade cycle (signal → gates → order) if the market is open
    Trade(TradeCmd),

    /// One exit-management pass over open option positions
    Manage,

    /// Cancel open orders older than the stale threshold
    Cleanup(CleanupCmd),

    /// Pull account, positions and orders into the state snapshot
    Sync,

    /// Print account, positions and risk state
    Status(StatusCmd),

    /// Record or search lessons learned
    #[command(subcommand)]
    Lessons(LessonsCmd),
}

#[derive(Args, Debug)]
pub struct TradeCmd {
    /// Run the gates but do not send orders
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct CleanupCmd {
    /// Cancel orders at least this old (defaults to orders.stale_order_hours)
    #[arg(long, value_name = "H")]
    pub max_age_hours: Option<f64>,
}

#[derive(Args, Debug)]
pub struct StatusCmd {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum LessonsCmd {
    /// Record a lesson
    Add(LessonAddCmd),
    /// Ranked lesson retrieval
    Search(LessonSearchCmd),
}

#[derive(Args, Debug)]
pub struct LessonAddCmd {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub body: String,

    /// low, medium, high or critical
    #[arg(long, default_value = "medium")]
    pub severity: Severity,

    /// Tag (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LessonSearchCmd {
    /// Free-text query
    pub query: String,

    #[arg(long, default_value_t = 5)]
    pub limit: usize,
}

/// Execute the parsed command.
pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Command::Run => run_daemon(config).await,
        Command::Trade(cmd) => trade(config, cmd).await,
        Command::Manage => manage(config).await,
        Command::Cleanup(cmd) => cleanup(config, cmd).await,
        Command::Sync => sync(config).await,
        Command::Status(cmd) => status(config, cmd).await,
        Command::Lessons(cmd) => lessons(config, cmd).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn trade(config: AppConfig, cmd: TradeCmd) -> Result<()> {
    let services = Services::connect(&config).await?;
    let dry_run = cmd.dry_run || config.bot.dry_run;
    let mut cycle = TradeCycle::new(
        &config,
        Arc::clone(&services.broker),
        Arc::clone(&services.repo),
        Arc::clone(&services.lessons),
        Arc::clone(&services.advisor),
        Arc::clone(&services.risk),
        dry_run,
    )?;
    let report = cycle.run_once(Utc::now()).await?;
    print_json(&report)
}

async fn manage(config: AppConfig) -> Result<()> {
    let services = Services::connect(&config).await?;
    let mut manager = PositionManager::new(
        &config,
        Arc::clone(&services.broker),
        Arc::clone(&services.repo),
        Arc::clone(&services.lessons),
        Arc::clone(&services.risk),
        config.bot.dry_run,
    )?;
    let report = manager.run_once(Utc::now()).await?;
    print_json(&report)
}

async fn cleanup(config: AppConfig, cmd: CleanupCmd) -> Result<()> {
    let hours = cmd.max_age_hours.unwrap_or(config.orders.stale_order_hours);
    anyhow::ensure!(hours > 0.0, "--max-age-hours must be positive");
    let services = Services::connect(&config).await?;
    let orders = OrderManager::new(Arc::clone(&services.broker), &config.orders, config.bot.dry_run);
    let report = orders
        .cleanup_stale_orders(Utc::now(), stale_threshold(hours))
        .await?;
    print_json(&report)
}

async fn sync(config: AppConfig) -> Result<()> {
    let services = Services::connect(&config).await?;
    let sync = StateSync::new(
        Arc::clone(&services.broker),
        Arc::clone(&services.repo),
        services.calendar.clone(),
        Arc::clone(&services.risk),
    );
    let report = sync.run(Utc::now()).await?;
    print_json(&report)
}

/// Momentum readout for one underlying.
#[derive(Debug, Serialize)]
struct UnderlyingStatus {
    symbol: String,
    rsi: Option<f64>,
    sma20: Option<f64>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    market_open: bool,
    minutes_until_close: Option<i64>,
    account: AccountSnapshot,
    positions: Vec<BrokerPosition>,
    snapshot: Option<BotStateSnapshot>,
    underlyings: Vec<UnderlyingStatus>,
}

async fn status(config: AppConfig, cmd: StatusCmd) -> Result<()> {
    let services = Services::connect(&config).await?;
    let now = Utc::now();
    let account = services.broker.account().await.context("Failed to load account")?;
    let positions = services
        .broker
        .positions()
        .await
        .context("Failed to load positions")?;
    let snapshot = services.repo.load_latest_state().await?;

    let lookback = (config.gates.rsi_period * 4 + 1).max(20);
    let mut underlyings = Vec::with_capacity(config.strategy.universe.len());
    for symbol in &config.strategy.universe {
        match services.broker.daily_closes(symbol, lookback).await {
            Ok(closes) => underlyings.push(UnderlyingStatus {
                symbol: symbol.clone(),
                rsi: rsi(&closes, config.gates.rsi_period),
                sma20: sma(&closes, 20),
            }),
            Err(e) => warn!(symbol = %symbol, error = %e, "Failed to load closes"),
        }
    }

    let report = StatusReport {
        market_open: services.calendar.is_open(now),
        minutes_until_close: services.calendar.minutes_until_close(now),
        account,
        positions,
        snapshot,
        underlyings,
    };

    if cmd.json {
        return print_json(&report);
    }

    let a = &report.account;
    println!(
        "Market {} ({})",
        if report.market_open { "open" } else { "closed" },
        report
            .minutes_until_close
            .map_or_else(|| "no session".to_string(), |m| format!("{m} min to close"))
    );
    println!(
        "Equity {:.2} (day {:+.2})  buying power {:.2}  options BP {:.2}  day trades {}",
        a.equity,
        a.day_change(),
        a.buying_power,
        a.options_buying_power,
        a.daytrade_count
    );
    println!("Positions: {}", report.positions.len());
    for p in &report.positions {
        println!(
            "  {:<22} {:>6} @ {:>8.2}  now {:>8.2}  P/L {:>+9.2}",
            p.symbol, p.qty, p.avg_entry_price, p.current_price, p.unrealized_pl
        );
    }
    match &report.snapshot {
        Some(s) => println!(
            "Risk: daily loss {:.2}, consecutive losses {}, breaker until {}, last entry {}",
            s.risk.daily_loss,
            s.risk.consecutive_losses,
            s.risk
                .circuit_breaker_until
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
            s.last_entry_date
                .map_or_else(|| "-".to_string(), |d| d.to_string())
        ),
        None => println!("Risk: no snapshot yet"),
    }
    for u in &report.underlyings {
        println!(
            "  {:<6} RSI {}  SMA20 {}",
            u.symbol,
            u.rsi.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}")),
            u.sma20.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
        );
    }
    Ok(())
}

async fn lessons(config: AppConfig, cmd: LessonsCmd) -> Result<()> {
    let store = Services::lesson_store(&config).await?;
    match cmd {
        LessonsCmd::Add(add) => {
            anyhow::ensure!(!add.title.trim().is_empty(), "--title must not be empty");
            let lesson = Lesson::new(add.title, add.body, add.severity, add.tags, Utc::now());
            store.record(&lesson).await?;
            print_json(&lesson)
        }
        LessonsCmd::Search(search) => {
            let results = store.search(&search.query, search.limit).await?;
            print_json(&results)
        }
    }
}

/// Daemon: scheduler + health + metrics until Ctrl-C.
async fn run_daemon(config: AppConfig) -> Result<()> {
    // ── 1. Services (broker, storage, lessons, advisor) ────
    let services = Services::connect(&config).await?;

    info!(
        name = %config.bot.name,
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.bot.mode,
        dry_run = config.bot.dry_run,
        universe = config.strategy.universe.len(),
        "Starting options gate bot"
    );

    // ── 2. Shutdown signal channel ──────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 3. Health server (/live + /ready) ───────────────────
    let health = Arc::new(HealthState::new());
    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    // ── 4. Prometheus metrics (/metrics) ────────────────────
    let metrics = if config.metrics.enabled {
        let registry = Arc::new(MetricsRegistry::new()?);
        let bind = config.metrics.bind_address.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        let server = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = server.serve(bind, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        });
        Some(registry)
    } else {
        None
    };

    // ── 5. Jobs + scheduler ─────────────────────────────────
    let dry_run = config.bot.dry_run;
    let jobs = Jobs {
        orders: OrderManager::new(Arc::clone(&services.broker), &config.orders, dry_run),
        sync: StateSync::new(
            Arc::clone(&services.broker),
            Arc::clone(&services.repo),
            services.calendar.clone(),
            Arc::clone(&services.risk),
        ),
        manage: PositionManager::new(
            &config,
            Arc::clone(&services.broker),
            Arc::clone(&services.repo),
            Arc::clone(&services.lessons),
            Arc::clone(&services.risk),
            dry_run,
        )?,
        trade: TradeCycle::new(
            &config,
            Arc::clone(&services.broker),
            Arc::clone(&services.repo),
            Arc::clone(&services.lessons),
            Arc::clone(&services.advisor),
            Arc::clone(&services.risk),
            dry_run,
        )?,
    };
    let scheduler = Scheduler::new(
        &config,
        jobs,
        Arc::clone(&services.broker),
        Arc::clone(&services.repo),
        Arc::clone(&services.risk),
        Arc::clone(&health),
        metrics,
    )?;
    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(scheduler.run(scheduler_shutdown));

    // ── 6. Wait for SIGINT → graceful shutdown ──────────────
    signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c")?;
    info!("SIGINT received, initiating graceful shutdown");
    health.set_trading_enabled(false);
    let _ = shutdown_tx.send(());

    // Scheduler finishes its tick and cancels working orders.
    match tokio::time::timeout(SHUTDOWN_GRACE, scheduler_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Scheduler exited with error"),
        Ok(Err(e)) => error!(error = %e, "Scheduler task panicked"),
        Err(_) => warn!(grace_s = SHUTDOWN_GRACE.as_secs(), "Scheduler did not stop in time"),
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

    info!("Shutdown complete");
    Ok(())
}
