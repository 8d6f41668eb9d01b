//! Trade Cycle - Signal, Gates, Order
//!
//! One entry pass over the configured universe:
//! 1. Check the session clock and the entry window (Eastern time)
//! 2. Build a candidate from the live chain for each free underlying
//! 3. Run the gate pipeline with lessons retrieved for context
//! 4. Submit approved candidates and journal every decision
//!
//! Prices on orders always come from quotes fetched in the same pass.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::market_hours::{MarketCalendar, parse_hhmm};
use crate::domain::strategy::{StrategyKind, StrategyParams, TradeCandidate, build_candidate};
use crate::domain::trade::{OptionContract, OrderId};
use crate::ports::advisor::TradeAdvisor;
use crate::ports::brokerage::{AccountSnapshot, Brokerage, OpenOrder};
use crate::ports::lessons::{LessonStore, ScoredLesson};
use crate::ports::repository::{DecisionRecord, Repository, TradeAction, TradeRecord};

use super::gates::{GateContext, GateKind, GatePipeline, GateVerdict};
use super::order_manager::OrderManager;
use super::risk_manager::{RiskManager, SharedRiskManager};
use super::state_sync::record_progress;

/// Why a cycle stopped early, or that it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
  MarketClosed,
  BeforeEntryWindow,
  AlreadyTraded,
  Completed,
}

/// What happened to one underlying.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SymbolOutcome {
  /// An option position or working order on this underlying exists.
  AlreadyPositioned,
  /// No contract set matched the strategy parameters.
  NoCandidate { reason: String },
  Rejected { gate: GateKind, reason: String },
  Submitted {
    order_id: OrderId,
    dry_run: bool,
    /// Buying power the entry holds.
    collateral: f64,
  },
  /// Approved but not sent (rate limit).
  Throttled,
  Failed { error: String },
}

/// Per-underlying result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolResult {
  pub underlying: String,
  pub strategy: StrategyKind,
  #[serde(flatten)]
  pub outcome: SymbolOutcome,
}

/// Result of one trade cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
  pub outcome: CycleOutcome,
  pub results: Vec<SymbolResult>,
}

impl CycleReport {
  fn skipped(outcome: CycleOutcome) -> Self {
    Self {
      outcome,
      results: Vec::new(),
    }
  }

  /// Orders submitted (or synthesised in dry run).
  pub fn submitted(&self) -> usize {
    self
      .results
      .iter()
      .filter(|r| matches!(r.outcome, SymbolOutcome::Submitted { .. }))
      .count()
  }
}

/// Entry use case.
pub struct TradeCycle<B: Brokerage, R: Repository, L: LessonStore> {
  broker: Arc<B>,
  repo: Arc<R>,
  lessons: Arc<L>,
  advisor: Arc<dyn TradeAdvisor>,
  pipeline: GatePipeline,
  orders: OrderManager<B>,
  risk: SharedRiskManager,
  calendar: MarketCalendar,
  entry_after: NaiveTime,
  universe: Vec<String>,
  kind: StrategyKind,
  params: StrategyParams,
  max_new_trades: usize,
  closes_lookback: usize,
  lessons_top_k: usize,
}

impl<B: Brokerage, R: Repository, L: LessonStore> TradeCycle<B, R, L> {
  /// Wire a trade cycle from config.
  pub fn new(
    config: &AppConfig,
    broker: Arc<B>,
    repo: Arc<R>,
    lessons: Arc<L>,
    advisor: Arc<dyn TradeAdvisor>,
    risk: SharedRiskManager,
    dry_run: bool,
  ) -> Result<Self> {
    let calendar = MarketCalendar::from_strings(&config.schedule.holidays, &config.schedule.half_days)?;
    let entry_after = parse_hhmm(&config.schedule.entry_after)?;
    let pipeline = GatePipeline::standard(&config.gates, &config.risk, Arc::clone(&advisor));
    let orders = OrderManager::new(Arc::clone(&broker), &config.orders, dry_run);

    Ok(Self {
      broker,
      repo,
      lessons,
      advisor,
      pipeline,
      orders,
      risk,
      calendar,
      entry_after,
      universe: config.strategy.universe.clone(),
      kind: config.strategy.kind,
      params: config.strategy.params(),
      max_new_trades: config.strategy.max_new_trades_per_cycle,
      // Wilder smoothing settles after a few periods.
      closes_lookback: config.gates.rsi_period * 4 + 1,
      lessons_top_k: config.lessons.top_k,
    })
  }

  /// Run one entry pass.
  #[instrument(skip(self), fields(strategy = %self.kind, dry_run = self.orders.is_dry_run()))]
  pub async fn run_once(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
    if !self.calendar.is_open(now) {
      debug!(next_open = ?self.calendar.next_open(now), "Market closed, skipping trade cycle");
      return Ok(CycleReport::skipped(CycleOutcome::MarketClosed));
    }
    if !self.calendar.is_after(now, self.entry_after) {
      debug!(entry_after = %self.entry_after, "Before entry window");
      return Ok(CycleReport::skipped(CycleOutcome::BeforeEntryWindow));
    }

    let today = self.calendar.eastern_date(now);
    let snapshot = self
      .repo
      .load_latest_state()
      .await
      .context("Failed to load snapshot")?;
    if snapshot.as_ref().and_then(|s| s.last_entry_date) == Some(today) {
      info!(date = %today, "Entry already made today");
      return Ok(CycleReport::skipped(CycleOutcome::AlreadyTraded));
    }

    let account = self.broker.account().await.context("Failed to load account")?;
    let positions = self
      .broker
      .positions()
      .await
      .context("Failed to load positions")?;
    let orders = self
      .broker
      .open_orders()
      .await
      .context("Failed to load open orders")?;

    let risk_view = {
      let mut risk = self.risk.lock().await;
      risk.roll_day(today, account.equity);
      risk.clone()
    };

    let option_positions: Vec<_> = positions.iter().filter(|p| p.is_option()).collect();
    let mut positioned: BTreeSet<String> = option_positions.iter().map(|p| p.underlying()).collect();
    positioned.extend(working_underlyings(&orders));
    let mut open_option_positions = option_positions.len();
    // Entries in this pass draw down the same buying power.
    let mut account = account;

    let mut results = Vec::with_capacity(self.universe.len());
    let mut placed = 0usize;
    let universe = self.universe.clone();

    for underlying in &universe {
      if placed >= self.max_new_trades {
        debug!(max = self.max_new_trades, "Per-cycle order cap reached");
        break;
      }
      if positioned.contains(underlying) {
        results.push(self.result(underlying, SymbolOutcome::AlreadyPositioned));
        continue;
      }

      let outcome = match self
        .evaluate_symbol(underlying, &account, open_option_positions, &risk_view, today, now)
        .await
      {
        Ok(outcome) => outcome,
        Err(e) => {
          warn!(underlying = %underlying, error = %e, "Symbol evaluation failed");
          SymbolOutcome::Failed {
            error: format!("{e:#}"),
          }
        }
      };

      if let SymbolOutcome::Submitted { collateral, .. } = &outcome {
        placed += 1;
        open_option_positions += 1;
        account.options_buying_power = (account.options_buying_power - collateral).max(0.0);
        account.buying_power = (account.buying_power - collateral).max(0.0);
      }
      results.push(self.result(underlying, outcome));
    }

    let entered = placed > 0 && !self.orders.is_dry_run();
    let risk_state = self.risk.lock().await.state().clone();
    record_progress(self.repo.as_ref(), now, today, &risk_state, |snapshot| {
      if entered {
        snapshot.last_entry_date = Some(today);
      }
    })
    .await?;

    let report = CycleReport {
      outcome: CycleOutcome::Completed,
      results,
    };
    info!(
      evaluated = report.results.len(),
      submitted = report.submitted(),
      "Trade cycle complete"
    );
    Ok(report)
  }

  fn result(&self, underlying: &str, outcome: SymbolOutcome) -> SymbolResult {
    SymbolResult {
      underlying: underlying.to_string(),
      strategy: self.kind,
      outcome,
    }
  }

  #[instrument(skip(self, account, risk, today, now))]
  async fn evaluate_symbol(
    &mut self,
    underlying: &str,
    account: &AccountSnapshot,
    open_option_positions: usize,
    risk: &RiskManager,
    today: NaiveDate,
    now: DateTime<Utc>,
  ) -> Result<SymbolOutcome> {
    let closes = self
      .broker
      .daily_closes(underlying, self.closes_lookback)
      .await
      .with_context(|| format!("Failed to load closes for {underlying}"))?;
    let price = self
      .broker
      .latest_price(underlying)
      .await
      .with_context(|| format!("Failed to load price for {underlying}"))?;
    let chain = self
      .broker
      .option_chain(
        underlying,
        today + Duration::days(self.params.min_dte),
        today + Duration::days(self.params.max_dte),
      )
      .await
      .with_context(|| format!("Failed to load option chain for {underlying}"))?;

    let Some(candidate) = build_candidate(self.kind, underlying, price, &chain, today, &self.params) else {
      let reason = if chain.is_empty() {
        "empty option chain".to_string()
      } else {
        format!(
          "no {} legs within {}..{} DTE around {price:.2}",
          self.kind, self.params.min_dte, self.params.max_dte
        )
      };
      info!(underlying, reason = %reason, "No candidate");
      return Ok(SymbolOutcome::NoCandidate { reason });
    };

    let lessons = self.relevant_lessons(&candidate).await;
    let ctx = GateContext {
      account: account.clone(),
      closes,
      open_option_positions,
      risk: risk.clone(),
      today,
      now,
      lessons,
    };

    let outcome = self.pipeline.evaluate(&candidate, &ctx).await;
    self.journal_decision(&candidate, &outcome.verdicts, outcome.approved(), now).await?;

    if let Some(rejection) = outcome.rejection() {
      return Ok(SymbolOutcome::Rejected {
        gate: rejection.gate,
        reason: rejection.reason.clone(),
      });
    }
    if !outcome.approved() {
      // Only reachable with an empty pipeline.
      return Ok(SymbolOutcome::NoCandidate {
        reason: "no gates configured".to_string(),
      });
    }

    let lesson_refs: Vec<_> = ctx.lessons.iter().map(|s| s.lesson.clone()).collect();
    let rationale = match self.advisor.rationale(&candidate, &lesson_refs).await {
      Ok(text) => text,
      Err(e) => {
        warn!(underlying, error = %e, "Rationale unavailable, journaling gate reasons");
        outcome
          .verdicts
          .iter()
          .map(|v| format!("{}: {}", v.gate, v.reason))
          .collect::<Vec<_>>()
          .join("; ")
      }
    };

    let client_order_id = format!("ogb-{}-{}", underlying.to_ascii_lowercase(), Uuid::new_v4().simple());
    let order = candidate.to_order(client_order_id);
    let Some(placement) = self.orders.submit(&order).await? else {
      return Ok(SymbolOutcome::Throttled);
    };

    let record = TradeRecord {
      id: Uuid::new_v4().to_string(),
      order_id: placement.order_id.clone(),
      client_order_id: placement.client_order_id.clone(),
      underlying: underlying.to_string(),
      strategy: Some(candidate.kind),
      action: TradeAction::Open,
      symbols: candidate.symbols(),
      qty: order.qty,
      limit_price: order.limit_price,
      is_credit: order.is_credit,
      realized_pnl: None,
      exit_reason: None,
      rationale: Some(rationale),
      dry_run: placement.dry_run,
      timestamp: now,
    };
    self
      .repo
      .save_trade(&record)
      .await
      .context("Failed to journal trade")?;

    info!(
      underlying,
      order_id = %placement.order_id,
      credit = order.limit_price,
      collateral = candidate.collateral_required(),
      "Entry submitted"
    );
    Ok(SymbolOutcome::Submitted {
      order_id: placement.order_id,
      dry_run: placement.dry_run,
      collateral: candidate.collateral_required(),
    })
  }

  /// Lessons for this underlying and strategy. Retrieval problems
  /// leave the context empty rather than blocking the gates.
  async fn relevant_lessons(&self, candidate: &TradeCandidate) -> Vec<ScoredLesson> {
    let query = format!("{} {}", candidate.underlying, lesson_terms(candidate.kind));
    match self.lessons.search(&query, self.lessons_top_k).await {
      Ok(found) => found,
      Err(e) => {
        warn!(underlying = %candidate.underlying, error = %e, "Lesson search failed");
        Vec::new()
      }
    }
  }

  async fn journal_decision(
    &self,
    candidate: &TradeCandidate,
    verdicts: &[GateVerdict],
    approved: bool,
    now: DateTime<Utc>,
  ) -> Result<()> {
    let record = DecisionRecord {
      id: Uuid::new_v4().to_string(),
      underlying: candidate.underlying.clone(),
      strategy: candidate.kind,
      approved,
      rejected_by: verdicts.iter().find(|v| !v.passed).map(|v| v.gate.to_string()),
      verdicts: verdicts.iter().map(|v| v.to_record()).collect(),
      net_credit: candidate.net_credit(),
      collateral: candidate.collateral_required(),
      timestamp: now,
    };
    self
      .repo
      .save_decision(&record)
      .await
      .context("Failed to journal gate decision")
  }
}

/// Underlyings with a working option order.
///
/// An entry the broker accepted but has not filled is not yet a
/// position, and must still block a second entry.
fn working_underlyings(orders: &[OpenOrder]) -> BTreeSet<String> {
  orders
    .iter()
    .filter(|o| o.status.is_working())
    .flat_map(|o| o.symbols.iter())
    .filter_map(|symbol| OptionContract::parse_occ(symbol).ok())
    .map(|c| c.underlying)
    .collect()
}

fn lesson_terms(kind: StrategyKind) -> &'static str {
  match kind {
    StrategyKind::CashSecuredPut => "csp cash secured short put assignment",
    StrategyKind::IronCondor => "iron condor short put call wings",
  }
}
