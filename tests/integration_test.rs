//! Integration Tests - End-to-end Bot Component Testing
//!
//! Tests the interaction between usecases, ports, and mock adapters.
//! Uses mockall for trait mocking and tokio::test for async tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use mockall::mock;
use mockall::predicate::*;
use rust_decimal::Decimal;
use tempfile::TempDir;

use options_gate_bot::adapters::metrics::HealthState;
use options_gate_bot::adapters::persistence::RepositoryImpl;
use options_gate_bot::config::AppConfig;
use options_gate_bot::config::loader::parse_config;
use options_gate_bot::domain::lesson::{Lesson, Severity};
use options_gate_bot::domain::market_hours::MarketCalendar;
use options_gate_bot::domain::risk::RiskState;
use options_gate_bot::domain::strategy::{OptionQuote, TradeCandidate};
use options_gate_bot::domain::trade::{
    OptionContract, OptionOrder, OptionType, OrderSide, OrderStatus,
};
use options_gate_bot::ports::advisor::{SentimentReading, TradeAdvisor};
use options_gate_bot::ports::brokerage::{
    AccountSnapshot, BrokerPosition, Brokerage, OpenOrder, OrderCancellation, OrderPlacement,
    PositionSide,
};
use options_gate_bot::ports::lessons::{LessonStore, ScoredLesson};
use options_gate_bot::ports::repository::{
    BotStateSnapshot, DailyPnl, DecisionRecord, Repository, STATE_VERSION, TradeAction,
    TradeRecord,
};
use options_gate_bot::usecases::gates::GateKind;
use options_gate_bot::usecases::order_manager::OrderManager;
use options_gate_bot::usecases::position_manager::{ExitReason, PositionManager};
use options_gate_bot::usecases::risk_manager::{RiskManager, SharedRiskManager};
use options_gate_bot::usecases::scheduler::{Jobs, Scheduler};
use options_gate_bot::usecases::state_sync::StateSync;
use options_gate_bot::usecases::trade_cycle::{CycleOutcome, SymbolOutcome, TradeCycle};

// ---- Mock Definitions ----

mock! {
    pub Broker {}

    #[async_trait::async_trait]
    impl Brokerage for Broker {
        async fn account(&self) -> anyhow::Result<AccountSnapshot>;
        async fn positions(&self) -> anyhow::Result<Vec<BrokerPosition>>;
        async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>>;
        async fn place_order(&self, order: &OptionOrder) -> anyhow::Result<OrderPlacement>;
        async fn cancel_order(&self, order_id: &str) -> anyhow::Result<OrderCancellation>;
        async fn daily_closes(&self, symbol: &str, lookback: usize) -> anyhow::Result<Vec<f64>>;
        async fn latest_price(&self, symbol: &str) -> anyhow::Result<f64>;
        async fn option_chain(
            &self,
            underlying: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> anyhow::Result<Vec<OptionQuote>>;
        async fn is_healthy(&self) -> bool;
    }
}

mock! {
    pub Advisor {}

    #[async_trait::async_trait]
    impl TradeAdvisor for Advisor {
        async fn sentiment(&self, underlying: &str, context: &str) -> anyhow::Result<SentimentReading>;
        async fn rationale(
            &self,
            candidate: &TradeCandidate,
            lessons: &[Lesson],
        ) -> anyhow::Result<String>;
    }
}

mock! {
    pub Lessons {}

    #[async_trait::async_trait]
    impl LessonStore for Lessons {
        async fn record(&self, lesson: &Lesson) -> anyhow::Result<()>;
        async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ScoredLesson>>;
        async fn all(&self) -> anyhow::Result<Vec<Lesson>>;
    }
}

mock! {
    pub Repo {}

    #[async_trait::async_trait]
    impl Repository for Repo {
        async fn save_trade(&self, record: &TradeRecord) -> anyhow::Result<()>;
        async fn load_trades(&self) -> anyhow::Result<Vec<TradeRecord>>;
        async fn save_decision(&self, record: &DecisionRecord) -> anyhow::Result<()>;
        async fn load_decisions(&self) -> anyhow::Result<Vec<DecisionRecord>>;
        async fn save_state(&self, state: &BotStateSnapshot) -> anyhow::Result<()>;
        async fn load_latest_state(&self) -> anyhow::Result<Option<BotStateSnapshot>>;
        async fn save_daily_pnl(&self, pnl: &DailyPnl) -> anyhow::Result<()>;
        async fn load_daily_pnl(&self) -> anyhow::Result<Vec<DailyPnl>>;
        async fn is_healthy(&self) -> bool;
    }
}

// ---- Fixtures ----

const CONFIG: &str = r#"
[bot]
name = "integration"

[broker]

[strategy]
universe = ["SPY", "IWM"]

[gates]
max_position_pct = 0.2

[risk]
max_daily_loss_fraction = 0.02
max_open_positions = 4

[orders]
min_interval_ms = 0
"#;

fn config() -> AppConfig {
    parse_config(CONFIG).unwrap()
}

/// Wednesday 2026-03-04, 10:30 ET (EST, before the DST switch).
fn open_session() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 15, 30, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()
}

fn account() -> AccountSnapshot {
    AccountSnapshot {
        equity: 100_000.0,
        last_equity: 99_500.0,
        buying_power: 100_000.0,
        options_buying_power: 100_000.0,
        cash: 100_000.0,
        daytrade_count: 0,
        pattern_day_trader: false,
        trading_blocked: false,
        status: "ACTIVE".to_string(),
    }
}

/// Sideways closes with RSI near 50.
fn calm_closes() -> Vec<f64> {
    (0..30)
        .map(|i| {
            let drift = 0.1 * f64::from(i);
            if i % 2 == 0 { 100.0 + drift } else { 99.2 + drift }
        })
        .collect()
}

fn quote(underlying: &str, exp: NaiveDate, strike: i64, option_type: OptionType, mid: f64) -> OptionQuote {
    OptionQuote {
        contract: OptionContract::new(underlying, exp, Decimal::from(strike), option_type),
        bid: mid - 0.05,
        ask: mid + 0.05,
        delta: None,
        implied_volatility: None,
    }
}

/// Puts and calls from 80 to 120 around a $100 underlying, 30 DTE.
fn chain(underlying: &str) -> Vec<OptionQuote> {
    let exp = today() + Duration::days(30);
    let mut chain = Vec::new();
    for strike in (80..=120).step_by(5) {
        let put_otm = (100 - strike).max(0) as f64;
        let call_otm = (strike - 100).max(0) as f64;
        chain.push(quote(underlying, exp, strike, OptionType::Put, (3.0 - put_otm * 0.12).max(0.10)));
        chain.push(quote(underlying, exp, strike, OptionType::Call, (3.0 - call_otm * 0.12).max(0.10)));
    }
    chain
}

/// Broker with a healthy account, no positions and tradable chains.
fn market_broker() -> MockBroker {
    let mut broker = MockBroker::new();
    broker.expect_account().returning(|| Ok(account()));
    broker.expect_positions().returning(|| Ok(Vec::new()));
    broker.expect_open_orders().returning(|| Ok(Vec::new()));
    broker.expect_daily_closes().returning(|_, _| Ok(calm_closes()));
    broker.expect_latest_price().returning(|_| Ok(100.0));
    broker
        .expect_option_chain()
        .returning(|underlying, _, _| Ok(chain(underlying)));
    broker
}

fn advisor(score: f64) -> Arc<MockAdvisor> {
    let mut advisor = MockAdvisor::new();
    advisor
        .expect_sentiment()
        .returning(move |_, _| Ok(SentimentReading::clamped(score, "test reading")));
    advisor
        .expect_rationale()
        .returning(|c, _| Ok(format!("{} looks calm", c.underlying)));
    Arc::new(advisor)
}

fn quiet_lessons() -> Arc<MockLessons> {
    let mut lessons = MockLessons::new();
    lessons.expect_search().returning(|_, _| Ok(Vec::new()));
    lessons.expect_record().never();
    Arc::new(lessons)
}

fn shared_risk(config: &AppConfig) -> SharedRiskManager {
    RiskManager::new(&config.risk, &config.gates).shared()
}

async fn temp_repo() -> (TempDir, Arc<RepositoryImpl>) {
    let dir = tempfile::tempdir().unwrap();
    let repo = RepositoryImpl::from_data_dir(dir.path()).await.unwrap();
    (dir, Arc::new(repo))
}

fn placement(order: &OptionOrder) -> OrderPlacement {
    OrderPlacement {
        order_id: format!("ord-{}", order.client_order_id),
        client_order_id: order.client_order_id.clone(),
        status: OrderStatus::Accepted,
        dry_run: false,
    }
}

// ---- Trade cycle ----

#[tokio::test]
async fn test_trade_cycle_submits_approved_put() {
    let config = config();
    let (_dir, repo) = temp_repo().await;

    let mut broker = market_broker();
    broker
        .expect_place_order()
        .times(1)
        .withf(|order| {
            order.legs.len() == 1 && order.is_credit && order.client_order_id.starts_with("ogb-spy-")
        })
        .returning(|order| Ok(placement(order)));

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        advisor(0.3),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = cycle.run_once(open_session()).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.submitted(), 1);
    // One new trade per cycle by default, so IWM is never evaluated.
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].underlying, "SPY");

    let trades = repo.load_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].action, TradeAction::Open);
    assert_eq!(trades[0].symbols, vec!["SPY260403P00095000".to_string()]);
    assert_eq!(trades[0].rationale.as_deref(), Some("SPY looks calm"));
    assert!(!trades[0].dry_run);

    let decisions = repo.load_decisions().await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].approved);
    assert_eq!(decisions[0].verdicts.len(), 4);

    let snapshot = repo.load_latest_state().await.unwrap().unwrap();
    assert_eq!(snapshot.last_entry_date, Some(today()));
}

#[tokio::test]
async fn test_dry_run_never_places_orders() {
    let config = config();
    let (_dir, repo) = temp_repo().await;

    let mut broker = market_broker();
    broker.expect_place_order().never();

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        advisor(0.3),
        shared_risk(&config),
        true,
    )
    .unwrap();

    let report = cycle.run_once(open_session()).await.unwrap();
    assert_eq!(report.submitted(), 1);
    match &report.results[0].outcome {
        SymbolOutcome::Submitted { order_id, dry_run, .. } => {
            assert!(dry_run);
            assert!(order_id.starts_with("dry-run-"));
        }
        other => panic!("expected dry-run submission, got {other:?}"),
    }

    let trades = repo.load_trades().await.unwrap();
    assert!(trades[0].dry_run);
    // Dry runs do not use up the day's entry.
    let snapshot = repo.load_latest_state().await.unwrap().unwrap();
    assert_eq!(snapshot.last_entry_date, None);
}

#[tokio::test]
async fn test_trade_cycle_skips_when_market_closed() {
    let config = config();
    // No expectations: any broker or repository call fails the test.
    let broker = MockBroker::new();
    let repo = MockRepo::new();

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::new(repo),
        Arc::new(MockLessons::new()),
        Arc::new(MockAdvisor::new()),
        shared_risk(&config),
        false,
    )
    .unwrap();

    // Saturday.
    let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 16, 0, 0).unwrap();
    let report = cycle.run_once(saturday).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::MarketClosed);
    assert!(report.results.is_empty());

    // Open, but before the 10:00 ET entry window.
    let early = Utc.with_ymd_and_hms(2026, 3, 4, 14, 45, 0).unwrap();
    let report = cycle.run_once(early).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::BeforeEntryWindow);
}

#[tokio::test]
async fn test_trade_cycle_skips_after_todays_entry() {
    let config = config();
    let mut repo = MockRepo::new();
    repo.expect_load_latest_state().times(1).returning(|| {
        Ok(Some(BotStateSnapshot {
            version: STATE_VERSION.to_string(),
            timestamp: open_session() - Duration::minutes(20),
            trading_date: today(),
            equity: 100_000.0,
            last_equity: 99_500.0,
            options_buying_power: 90_500.0,
            position_symbols: vec!["SPY260403P00095000".to_string()],
            open_order_ids: Vec::new(),
            risk: RiskState::default(),
            last_entry_date: Some(today()),
            pending_closes: Vec::new(),
        }))
    });
    repo.expect_save_state().never();

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(MockBroker::new()),
        Arc::new(repo),
        Arc::new(MockLessons::new()),
        Arc::new(MockAdvisor::new()),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = cycle.run_once(open_session()).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::AlreadyTraded);
}

#[tokio::test]
async fn test_empty_chain_yields_no_candidate() {
    let config = config();
    let (_dir, repo) = temp_repo().await;

    let mut broker = MockBroker::new();
    broker.expect_account().returning(|| Ok(account()));
    broker.expect_positions().returning(|| Ok(Vec::new()));
    broker.expect_open_orders().returning(|| Ok(Vec::new()));
    broker.expect_daily_closes().returning(|_, _| Ok(calm_closes()));
    broker.expect_latest_price().returning(|_| Ok(100.0));
    broker.expect_option_chain().returning(|_, _, _| Ok(Vec::new()));
    broker.expect_place_order().never();

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        Arc::new(MockAdvisor::new()),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = cycle.run_once(open_session()).await.unwrap();
    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(
            result.outcome,
            SymbolOutcome::NoCandidate {
                reason: "empty option chain".to_string()
            }
        );
    }
    assert!(repo.load_decisions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bearish_sentiment_rejects_and_journals() {
    let config = config();
    let (_dir, repo) = temp_repo().await;

    let mut broker = market_broker();
    broker.expect_place_order().never();

    let mut advisor = MockAdvisor::new();
    advisor
        .expect_sentiment()
        .returning(|_, _| Ok(SentimentReading::clamped(-0.9, "selloff")));
    advisor.expect_rationale().never();

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        Arc::new(advisor),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = cycle.run_once(open_session()).await.unwrap();
    assert_eq!(report.submitted(), 0);
    assert!(report.results.iter().all(|r| matches!(
        r.outcome,
        SymbolOutcome::Rejected {
            gate: GateKind::Sentiment,
            ..
        }
    )));

    let decisions = repo.load_decisions().await.unwrap();
    assert_eq!(decisions.len(), 2);
    assert!(decisions.iter().all(|d| !d.approved));
    assert_eq!(decisions[0].rejected_by.as_deref(), Some("sentiment"));
    // Momentum passed, sentiment stopped the pipeline.
    assert_eq!(decisions[0].verdicts.len(), 2);
}

#[tokio::test]
async fn test_existing_position_skips_underlying() {
    let config = config();
    let (_dir, repo) = temp_repo().await;

    let held = option_position("SPY", 30, OptionType::Put, 95, PositionSide::Short, 2.0, 1.9);
    let mut broker = MockBroker::new();
    broker.expect_account().returning(|| Ok(account()));
    broker
        .expect_positions()
        .returning(move || Ok(vec![held.clone()]));
    broker.expect_open_orders().returning(|| Ok(Vec::new()));
    broker
        .expect_daily_closes()
        .with(eq("IWM"), always())
        .returning(|_, _| Ok(calm_closes()));
    broker.expect_latest_price().returning(|_| Ok(100.0));
    broker
        .expect_option_chain()
        .returning(|underlying, _, _| Ok(chain(underlying)));
    broker
        .expect_place_order()
        .times(1)
        .returning(|order| Ok(placement(order)));

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        advisor(0.1),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = cycle.run_once(open_session()).await.unwrap();
    assert_eq!(report.results[0].outcome, SymbolOutcome::AlreadyPositioned);
    assert_eq!(report.results[1].underlying, "IWM");
    assert!(matches!(report.results[1].outcome, SymbolOutcome::Submitted { .. }));
}

#[tokio::test]
async fn test_entries_in_one_cycle_share_buying_power() {
    let config = parse_config(
        r#"
[bot]
name = "integration"

[broker]

[strategy]
universe = ["SPY", "IWM"]
max_new_trades_per_cycle = 2

[gates]
max_position_pct = 1.0

[risk]
max_daily_loss_fraction = 0.02
max_open_positions = 4

[orders]
min_interval_ms = 0
"#,
    )
    .unwrap();
    let (_dir, repo) = temp_repo().await;

    let mut broker = MockBroker::new();
    broker.expect_account().returning(|| {
        Ok(AccountSnapshot {
            options_buying_power: 10_000.0,
            buying_power: 10_000.0,
            ..account()
        })
    });
    broker.expect_positions().returning(|| Ok(Vec::new()));
    broker.expect_open_orders().returning(|| Ok(Vec::new()));
    broker.expect_daily_closes().returning(|_, _| Ok(calm_closes()));
    broker.expect_latest_price().returning(|_| Ok(100.0));
    broker
        .expect_option_chain()
        .returning(|underlying, _, _| Ok(chain(underlying)));
    // A $95 put holds $9,500: the first fits, the second no longer does.
    broker
        .expect_place_order()
        .times(1)
        .withf(|order| order.client_order_id.starts_with("ogb-spy-"))
        .returning(|order| Ok(placement(order)));

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        advisor(0.3),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = cycle.run_once(open_session()).await.unwrap();
    assert_eq!(report.submitted(), 1);
    match &report.results[0].outcome {
        SymbolOutcome::Submitted { collateral, .. } => assert!((collateral - 9_500.0).abs() < 1e-9),
        other => panic!("expected SPY submission, got {other:?}"),
    }
    match &report.results[1].outcome {
        SymbolOutcome::Rejected { gate, reason } => {
            assert_eq!(*gate, GateKind::Risk);
            assert!(reason.contains("buying power 500.00"), "{reason}");
        }
        other => panic!("expected IWM rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_working_entry_order_blocks_reentry() {
    let config = parse_config(&CONFIG.replace(r#"["SPY", "IWM"]"#, r#"["SPY"]"#)).unwrap();
    let (_dir, repo) = temp_repo().await;
    let now = open_session();

    let mut broker = MockBroker::new();
    broker.expect_account().returning(|| Ok(account()));
    broker.expect_positions().returning(|| Ok(Vec::new()));
    // An unfilled SPY put from earlier in the session is still resting.
    broker
        .expect_open_orders()
        .returning(move || Ok(vec![open_order("entry-1", Duration::minutes(40), now)]));
    broker.expect_daily_closes().never();
    broker.expect_option_chain().never();
    broker.expect_place_order().never();

    let mut cycle = TradeCycle::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        Arc::new(MockAdvisor::new()),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = cycle.run_once(now).await.unwrap();
    assert_eq!(report.submitted(), 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].underlying, "SPY");
    assert_eq!(report.results[0].outcome, SymbolOutcome::AlreadyPositioned);
    assert!(repo.load_decisions().await.unwrap().is_empty());
}

// ---- Stale-order cleanup ----

fn open_order(id: &str, age: Duration, now: DateTime<Utc>) -> OpenOrder {
    OpenOrder {
        id: id.to_string(),
        client_order_id: format!("ogb-{id}"),
        symbols: vec!["SPY260403P00095000".to_string()],
        status: OrderStatus::New,
        created_at: now - age,
        limit_price: Some(2.4),
    }
}

#[tokio::test]
async fn test_cleanup_cancels_orders_at_or_past_threshold() {
    let config = config();
    let now = open_session();

    let mut broker = MockBroker::new();
    broker.expect_open_orders().returning(move || {
        Ok(vec![
            open_order("old", Duration::hours(5), now),
            open_order("edge", Duration::hours(4), now),
            open_order("fresh", Duration::hours(1), now),
        ])
    });
    broker
        .expect_cancel_order()
        .with(eq("old"))
        .times(1)
        .returning(|id| {
            Ok(OrderCancellation {
                order_id: id.to_string(),
                success: true,
                error: None,
            })
        });
    broker
        .expect_cancel_order()
        .with(eq("edge"))
        .times(1)
        .returning(|id| {
            Ok(OrderCancellation {
                order_id: id.to_string(),
                success: false,
                error: Some("order already filled".to_string()),
            })
        });
    broker.expect_cancel_order().with(eq("fresh")).never();

    let orders = OrderManager::new(Arc::new(broker), &config.orders, false);
    let report = orders
        .cleanup_stale_orders(now, Duration::hours(4))
        .await
        .unwrap();

    assert_eq!(report.inspected, 3);
    assert_eq!(report.cancelled, vec!["old".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "edge");
    assert!(report.failed[0].1.contains("filled"));
}

#[tokio::test]
async fn test_cleanup_with_no_orders_is_a_no_op() {
    let config = config();
    let mut broker = MockBroker::new();
    broker.expect_open_orders().returning(|| Ok(Vec::new()));
    broker.expect_cancel_order().never();

    let orders = OrderManager::new(Arc::new(broker), &config.orders, false);
    let report = orders
        .cleanup_stale_orders(open_session(), Duration::hours(4))
        .await
        .unwrap();
    assert_eq!(report.inspected, 0);
    assert!(report.cancelled.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_dry_run_cleanup_leaves_orders_alone() {
    let config = config();
    let now = open_session();
    let mut broker = MockBroker::new();
    broker
        .expect_open_orders()
        .returning(move || Ok(vec![open_order("old", Duration::hours(9), now)]));
    broker.expect_cancel_order().never();

    let orders = OrderManager::new(Arc::new(broker), &config.orders, true);
    let report = orders.cancel_all().await.unwrap();
    assert_eq!(report.inspected, 1);
    assert!(report.cancelled.is_empty());
}

// ---- Position management ----

fn option_position(
    underlying: &str,
    dte: i64,
    option_type: OptionType,
    strike: i64,
    side: PositionSide,
    entry: f64,
    mark: f64,
) -> BrokerPosition {
    let contract = OptionContract::new(
        underlying,
        today() + Duration::days(dte),
        Decimal::from(strike),
        option_type,
    );
    let qty = if side == PositionSide::Short { -1.0 } else { 1.0 };
    let sign = if side == PositionSide::Short { -1.0 } else { 1.0 };
    BrokerPosition {
        symbol: contract.occ_symbol(),
        qty,
        side,
        avg_entry_price: entry,
        current_price: mark,
        unrealized_pl: sign * (mark - entry) * 100.0,
        asset_class: "us_option".to_string(),
    }
}

/// Broker whose positions and working orders change between passes.
/// Every placed order id is kept in `placed`.
struct LiveBook {
    positions: Arc<Mutex<Vec<BrokerPosition>>>,
    orders: Arc<Mutex<Vec<OpenOrder>>>,
    placed: Arc<Mutex<Vec<String>>>,
}

impl LiveBook {
    fn new(positions: Vec<BrokerPosition>) -> Self {
        Self {
            positions: Arc::new(Mutex::new(positions)),
            orders: Arc::new(Mutex::new(Vec::new())),
            placed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn broker(&self, closes: usize) -> MockBroker {
        let mut broker = MockBroker::new();
        let positions = Arc::clone(&self.positions);
        broker
            .expect_positions()
            .returning(move || Ok(positions.lock().unwrap().clone()));
        let orders = Arc::clone(&self.orders);
        broker
            .expect_open_orders()
            .returning(move || Ok(orders.lock().unwrap().clone()));
        let placed = Arc::clone(&self.placed);
        broker
            .expect_place_order()
            .times(closes)
            .withf(|order| !order.is_credit && order.legs[0].side == OrderSide::Buy)
            .returning(move |order| {
                let accepted = placement(order);
                placed.lock().unwrap().push(accepted.order_id.clone());
                Ok(accepted)
            });
        broker
    }
}

#[tokio::test]
async fn test_manage_books_exits_once_legs_are_gone() {
    let config = config();
    let (_dir, repo) = temp_repo().await;
    let now = open_session();

    let winner = option_position("SPY", 30, OptionType::Put, 95, PositionSide::Short, 2.0, 0.8);
    let loser = option_position("IWM", 30, OptionType::Put, 190, PositionSide::Short, 1.0, 3.5);
    let holder = option_position("QQQ", 30, OptionType::Put, 400, PositionSide::Short, 2.0, 1.8);
    let book = LiveBook::new(vec![winner.clone(), loser.clone(), holder.clone()]);

    let mut lessons = MockLessons::new();
    lessons
        .expect_record()
        .times(1)
        .withf(|lesson| lesson.severity == Severity::High && lesson.tags.contains(&"IWM".to_string()))
        .returning(|_| Ok(()));

    let risk = shared_risk(&config);
    let mut manager = PositionManager::new(
        &config,
        Arc::new(book.broker(2)),
        Arc::clone(&repo),
        Arc::new(lessons),
        Arc::clone(&risk),
        false,
    )
    .unwrap();

    // Submitted, nothing booked yet.
    let report = manager.run_once(now).await.unwrap();
    assert_eq!(report.inspected, 3);
    assert_eq!(report.closed.len(), 2);
    assert!(report.settled.is_empty());

    let profit = report.closed.iter().find(|c| c.symbol == winner.symbol).unwrap();
    assert_eq!(profit.reason, ExitReason::ProfitTarget);
    assert!((profit.pnl - 120.0).abs() < 1e-9);
    let stop = report.closed.iter().find(|c| c.symbol == loser.symbol).unwrap();
    assert_eq!(stop.reason, ExitReason::StopLoss);
    assert!((stop.pnl + 250.0).abs() < 1e-9);

    assert_eq!(risk.lock().await.daily_loss(), 0.0);
    assert!(repo.load_trades().await.unwrap().is_empty());
    let snapshot = repo.load_latest_state().await.unwrap().unwrap();
    assert_eq!(snapshot.pending_closes.len(), 2);

    // Both fills land.
    *book.positions.lock().unwrap() = vec![holder];
    let report = manager.run_once(now + Duration::minutes(10)).await.unwrap();
    assert!(report.closed.is_empty());
    assert_eq!(report.settled.len(), 2);
    assert!((risk.lock().await.daily_loss() - 250.0).abs() < 1e-9);

    let trades = repo.load_trades().await.unwrap();
    assert_eq!(trades.len(), 2);
    assert!(trades.iter().all(|t| t.action == TradeAction::Close && !t.dry_run));
    let booked: f64 = trades.iter().filter_map(|t| t.realized_pnl).sum();
    assert!((booked + 130.0).abs() < 1e-9);

    let snapshot = repo.load_latest_state().await.unwrap().unwrap();
    assert!(snapshot.pending_closes.is_empty());
    assert!((snapshot.risk.daily_loss - 250.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_unfilled_close_is_booked_once_after_retries() {
    let config = config();
    let (_dir, repo) = temp_repo().await;
    let now = open_session();

    let loser = option_position("IWM", 30, OptionType::Put, 190, PositionSide::Short, 1.0, 3.5);
    let symbol = loser.symbol.clone();
    let book = LiveBook::new(vec![loser]);

    let mut lessons = MockLessons::new();
    lessons.expect_record().times(1).returning(|_| Ok(()));

    let risk = shared_risk(&config);
    let mut manager = PositionManager::new(
        &config,
        Arc::new(book.broker(2)),
        Arc::clone(&repo),
        Arc::new(lessons),
        Arc::clone(&risk),
        false,
    )
    .unwrap();

    let report = manager.run_once(now).await.unwrap();
    assert_eq!(report.closed.len(), 1);

    // Still resting at the broker: left alone, still pending.
    let first = book.placed.lock().unwrap()[0].clone();
    let mut resting = open_order(&first, Duration::minutes(30), now);
    resting.symbols = vec![symbol.clone()];
    *book.orders.lock().unwrap() = vec![resting];
    let report = manager.run_once(now + Duration::hours(1)).await.unwrap();
    assert!(report.closed.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(
        repo.load_latest_state().await.unwrap().unwrap().pending_closes.len(),
        1
    );

    // Expired unfilled: dropped and sent again, nothing booked.
    book.orders.lock().unwrap().clear();
    let report = manager.run_once(now + Duration::hours(2)).await.unwrap();
    assert_eq!(report.lapsed, vec![symbol.clone()]);
    assert_eq!(report.closed.len(), 1);
    assert!(report.settled.is_empty());
    assert_eq!(risk.lock().await.daily_loss(), 0.0);
    assert!(repo.load_trades().await.unwrap().is_empty());

    // The retry fills.
    book.positions.lock().unwrap().clear();
    let report = manager.run_once(now + Duration::hours(3)).await.unwrap();
    assert_eq!(report.settled.len(), 1);
    assert_eq!(report.settled[0].order_id, book.placed.lock().unwrap()[1]);

    let state = risk.lock().await.state().clone();
    assert!((state.daily_loss - 250.0).abs() < 1e-9);
    assert_eq!(state.consecutive_losses, 1);

    let trades = repo.load_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].realized_pnl, Some(-250.0));
    assert_eq!(trades[0].exit_reason.as_deref(), Some("stop_loss"));

    // Nothing left to book on later passes.
    let report = manager.run_once(now + Duration::hours(4)).await.unwrap();
    assert!(report.settled.is_empty());
    assert!((risk.lock().await.daily_loss() - 250.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_manage_skips_legs_with_working_close() {
    let config = config();
    let (_dir, repo) = temp_repo().await;

    let expiring = option_position("SPY", 3, OptionType::Put, 95, PositionSide::Short, 2.0, 1.5);
    let symbol = expiring.symbol.clone();
    let now = open_session();

    let mut broker = MockBroker::new();
    broker
        .expect_positions()
        .returning(move || Ok(vec![expiring.clone()]));
    broker.expect_open_orders().returning(move || {
        let mut order = open_order("close-1", Duration::minutes(5), now);
        order.symbols = vec![symbol.clone()];
        Ok(vec![order])
    });
    broker.expect_place_order().never();

    let mut manager = PositionManager::new(
        &config,
        Arc::new(broker),
        Arc::clone(&repo),
        quiet_lessons(),
        shared_risk(&config),
        false,
    )
    .unwrap();

    let report = manager.run_once(now).await.unwrap();
    assert!(report.closed.is_empty());
    assert_eq!(report.skipped.len(), 1);
}

// ---- State sync ----

#[tokio::test]
async fn test_sync_closes_previous_day_and_diffs_positions() {
    let config = config();
    let (_dir, repo) = temp_repo().await;
    let yesterday = today() - Duration::days(1);

    repo.save_state(&BotStateSnapshot {
        version: STATE_VERSION.to_string(),
        timestamp: Utc.with_ymd_and_hms(2026, 3, 3, 20, 55, 0).unwrap(),
        trading_date: yesterday,
        equity: 99_500.0,
        last_equity: 99_000.0,
        options_buying_power: 90_000.0,
        position_symbols: vec!["IWM260403P00190000".to_string()],
        open_order_ids: Vec::new(),
        risk: RiskState::default(),
        last_entry_date: Some(yesterday),
        pending_closes: Vec::new(),
    })
    .await
    .unwrap();

    let held = option_position("SPY", 30, OptionType::Put, 95, PositionSide::Short, 2.0, 1.9);
    let held_symbol = held.symbol.clone();
    let mut broker = MockBroker::new();
    broker.expect_account().returning(|| Ok(account()));
    broker
        .expect_positions()
        .returning(move || Ok(vec![held.clone()]));
    broker.expect_open_orders().returning(|| Ok(Vec::new()));

    let calendar = MarketCalendar::from_strings(&config.schedule.holidays, &config.schedule.half_days).unwrap();
    let sync = StateSync::new(Arc::new(broker), Arc::clone(&repo), calendar, shared_risk(&config));
    let report = sync.run(open_session()).await.unwrap();

    assert_eq!(report.trading_date, today());
    assert_eq!(report.option_positions, 1);
    assert_eq!(report.opened, vec![held_symbol]);
    assert_eq!(report.closed, vec!["IWM260403P00190000".to_string()]);

    let closed_day = report.closed_day.unwrap();
    assert_eq!(closed_day.date, yesterday);
    // Today's last_equity is yesterday's close.
    assert!((closed_day.pnl - 500.0).abs() < 1e-9);
    assert_eq!(repo.load_daily_pnl().await.unwrap().len(), 1);

    let snapshot = repo.load_latest_state().await.unwrap().unwrap();
    assert_eq!(snapshot.trading_date, today());
    assert_eq!(snapshot.last_entry_date, Some(yesterday));
    assert_eq!(snapshot.risk.trading_date, Some(today()));
}

// ---- Scheduler ----

type CallLog = Arc<Mutex<Vec<&'static str>>>;

fn scheduler_jobs<R: Repository>(
    config: &AppConfig,
    broker: &Arc<MockBroker>,
    repo: &Arc<R>,
    risk: &SharedRiskManager,
) -> Jobs<MockBroker, R, MockLessons> {
    let calendar = MarketCalendar::from_strings(&config.schedule.holidays, &config.schedule.half_days).unwrap();
    Jobs {
        orders: OrderManager::new(Arc::clone(broker), &config.orders, false),
        sync: StateSync::new(Arc::clone(broker), Arc::clone(repo), calendar, Arc::clone(risk)),
        manage: PositionManager::new(
            config,
            Arc::clone(broker),
            Arc::clone(repo),
            Arc::new(MockLessons::new()),
            Arc::clone(risk),
            false,
        )
        .unwrap(),
        trade: TradeCycle::new(
            config,
            Arc::clone(broker),
            Arc::clone(repo),
            Arc::new(MockLessons::new()),
            Arc::new(MockAdvisor::new()),
            Arc::clone(risk),
            false,
        )
        .unwrap(),
    }
}

#[tokio::test]
async fn test_tick_runs_remaining_jobs_in_order_after_cleanup_fails() {
    let config = config();
    let (_dir, repo) = temp_repo().await;
    let calls: CallLog = Arc::default();

    let mut broker = MockBroker::new();
    let log = Arc::clone(&calls);
    broker.expect_is_healthy().returning(move || {
        log.lock().unwrap().push("is_healthy");
        true
    });
    let log = Arc::clone(&calls);
    broker.expect_open_orders().times(1).returning(move || {
        log.lock().unwrap().push("open_orders");
        Err(anyhow::anyhow!("orders endpoint unavailable"))
    });
    let log = Arc::clone(&calls);
    broker.expect_open_orders().returning(move || {
        log.lock().unwrap().push("open_orders");
        Ok(Vec::new())
    });
    let log = Arc::clone(&calls);
    broker.expect_account().returning(move || {
        log.lock().unwrap().push("account");
        Ok(account())
    });
    let log = Arc::clone(&calls);
    broker.expect_positions().returning(move || {
        log.lock().unwrap().push("positions");
        Ok(Vec::new())
    });
    let log = Arc::clone(&calls);
    broker.expect_daily_closes().returning(move |_, _| {
        log.lock().unwrap().push("daily_closes");
        Ok(calm_closes())
    });
    let log = Arc::clone(&calls);
    broker.expect_latest_price().returning(move |_| {
        log.lock().unwrap().push("latest_price");
        Ok(100.0)
    });
    let log = Arc::clone(&calls);
    broker.expect_option_chain().returning(move |_, _, _| {
        log.lock().unwrap().push("option_chain");
        Ok(Vec::new())
    });
    broker.expect_cancel_order().never();
    broker.expect_place_order().never();

    let broker = Arc::new(broker);
    let risk = shared_risk(&config);
    let health = Arc::new(HealthState::new());
    let jobs = scheduler_jobs(&config, &broker, &repo, &risk);
    let mut scheduler = Scheduler::new(
        &config,
        jobs,
        broker,
        Arc::clone(&repo),
        risk,
        Arc::clone(&health),
        None,
    )
    .unwrap();

    scheduler.tick(open_session()).await;

    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            "is_healthy",
            // cleanup
            "open_orders",
            // sync
            "account",
            "positions",
            "open_orders",
            // manage
            "positions",
            "open_orders",
            // trade
            "account",
            "positions",
            "open_orders",
            "daily_closes",
            "latest_price",
            "option_chain",
            "daily_closes",
            "latest_price",
            "option_chain",
        ]
    );

    let snapshot = repo.load_latest_state().await.unwrap().unwrap();
    assert_eq!(snapshot.trading_date, today());
    assert_eq!(snapshot.risk.trading_date, Some(today()));
    let report = health.report();
    assert!(report.ready);
    assert!(report.trading_enabled);
}

#[tokio::test]
async fn test_tick_only_checks_health_while_market_closed() {
    let config = config();
    // Only the health checks are expected; any job call fails the test.
    let mut broker = MockBroker::new();
    broker.expect_is_healthy().times(1).returning(|| false);
    let mut repo = MockRepo::new();
    repo.expect_is_healthy().times(1).returning(|| true);

    let broker = Arc::new(broker);
    let repo = Arc::new(repo);
    let risk = shared_risk(&config);
    let health = Arc::new(HealthState::new());
    let jobs = scheduler_jobs(&config, &broker, &repo, &risk);
    let mut scheduler =
        Scheduler::new(&config, jobs, broker, repo, risk, Arc::clone(&health), None).unwrap();

    // Saturday.
    scheduler
        .tick(Utc.with_ymd_and_hms(2026, 3, 7, 16, 0, 0).unwrap())
        .await;

    let report = health.report();
    assert!(!report.ready);
    assert!(!report.broker);
    assert!(report.storage);
}
