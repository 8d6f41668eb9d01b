//! Gate Pipeline - Momentum, Sentiment, Risk and Execution Filters
//!
//! Every trade candidate passes four gates in order before an order
//! is built. The first rejection stops the pipeline; an error inside
//! a gate counts as a rejection.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{GateConfig, RiskConfig};
use crate::domain::indicators::rsi;
use crate::domain::strategy::{StrategyKind, TradeCandidate};
use crate::ports::advisor::TradeAdvisor;
use crate::ports::brokerage::AccountSnapshot;
use crate::ports::lessons::ScoredLesson;
use crate::ports::repository::RecordedVerdict;

use super::risk_manager::RiskManager;

/// Which gate produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
  Momentum,
  Sentiment,
  Risk,
  Execution,
}

impl GateKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Momentum => "momentum",
      Self::Sentiment => "sentiment",
      Self::Risk => "risk",
      Self::Execution => "execution",
    }
  }
}

impl fmt::Display for GateKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result of one gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateVerdict {
  pub gate: GateKind,
  pub passed: bool,
  /// Human-readable explanation, journaled with the decision.
  pub reason: String,
}

impl GateVerdict {
  pub fn pass(gate: GateKind, reason: impl Into<String>) -> Self {
    Self {
      gate,
      passed: true,
      reason: reason.into(),
    }
  }

  pub fn reject(gate: GateKind, reason: impl Into<String>) -> Self {
    Self {
      gate,
      passed: false,
      reason: reason.into(),
    }
  }

  /// Journal form.
  pub fn to_record(&self) -> RecordedVerdict {
    RecordedVerdict {
      gate: self.gate.to_string(),
      passed: self.passed,
      reason: self.reason.clone(),
    }
  }
}

/// Everything a gate may look at besides the candidate.
#[derive(Debug, Clone)]
pub struct GateContext {
  /// Account as of this cycle.
  pub account: AccountSnapshot,
  /// Daily closes of the underlying, oldest first.
  pub closes: Vec<f64>,
  /// Open option positions (legs).
  pub open_option_positions: usize,
  /// Risk manager state for this cycle.
  pub risk: RiskManager,
  /// Eastern trading date.
  pub today: NaiveDate,
  pub now: DateTime<Utc>,
  /// Lessons retrieved for this underlying.
  pub lessons: Vec<ScoredLesson>,
}

/// A single trade filter.
#[async_trait]
pub trait Gate: Send + Sync {
  fn kind(&self) -> GateKind;

  async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext) -> Result<GateVerdict>;
}

/// RSI filter.
///
/// Cash-secured puts want a market that is neither oversold nor
/// overbought; condors want RSI close to 50.
pub struct MomentumGate {
  period: usize,
  floor: f64,
  ceiling: f64,
  condor_band: f64,
}

impl MomentumGate {
  pub fn new(config: &GateConfig) -> Self {
    Self {
      period: config.rsi_period,
      floor: config.rsi_floor,
      ceiling: config.rsi_ceiling,
      condor_band: config.condor_rsi_band,
    }
  }

  /// Closes needed for one RSI value.
  pub fn lookback(&self) -> usize {
    self.period + 1
  }
}

#[async_trait]
impl Gate for MomentumGate {
  fn kind(&self) -> GateKind {
    GateKind::Momentum
  }

  async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext) -> Result<GateVerdict> {
    let Some(value) = rsi(&ctx.closes, self.period) else {
      return Ok(GateVerdict::reject(
        self.kind(),
        format!(
          "insufficient history: {} closes for RSI({})",
          ctx.closes.len(),
          self.period
        ),
      ));
    };

    let (low, high) = match candidate.kind {
      StrategyKind::CashSecuredPut => (self.floor, self.ceiling),
      StrategyKind::IronCondor => (50.0 - self.condor_band, 50.0 + self.condor_band),
    };

    if (low..=high).contains(&value) {
      Ok(GateVerdict::pass(
        self.kind(),
        format!("RSI {value:.1} inside {low:.1}..{high:.1}"),
      ))
    } else {
      Ok(GateVerdict::reject(
        self.kind(),
        format!("RSI {value:.1} outside {low:.1}..{high:.1}"),
      ))
    }
  }
}

/// LLM sentiment filter.
pub struct SentimentGate {
  advisor: Arc<dyn TradeAdvisor>,
  /// RSI period quoted to the advisor, same as the momentum gate's.
  rsi_period: usize,
  min_sentiment: f64,
  condor_max_abs: f64,
}

impl SentimentGate {
  pub fn new(advisor: Arc<dyn TradeAdvisor>, config: &GateConfig) -> Self {
    Self {
      advisor,
      rsi_period: config.rsi_period,
      min_sentiment: config.min_sentiment,
      condor_max_abs: config.condor_max_abs_sentiment,
    }
  }

  fn context(&self, candidate: &TradeCandidate, ctx: &GateContext) -> String {
    let mut context = format!(
      "{} last {:.2}, planned {} for net credit {:.2}.",
      candidate.underlying,
      candidate.underlying_price,
      candidate.kind,
      candidate.net_credit()
    );
    if let Some(value) = rsi(&ctx.closes, self.rsi_period) {
      context.push_str(&format!(" RSI({}) {value:.1}.", self.rsi_period));
    }
    for scored in &ctx.lessons {
      context.push_str(&format!(
        "\nLesson ({}): {} - {}",
        scored.lesson.severity, scored.lesson.title, scored.lesson.body
      ));
    }
    context
  }
}

#[async_trait]
impl Gate for SentimentGate {
  fn kind(&self) -> GateKind {
    GateKind::Sentiment
  }

  async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext) -> Result<GateVerdict> {
    let context = self.context(candidate, ctx);
    let reading = match self.advisor.sentiment(&candidate.underlying, &context).await {
      Ok(reading) => reading,
      Err(e) => {
        warn!(underlying = %candidate.underlying, error = %e, "Sentiment unavailable");
        return Ok(GateVerdict::reject(
          self.kind(),
          format!("sentiment unavailable: {e:#}"),
        ));
      }
    };

    let score = reading.score;
    let (passed, rule) = match candidate.kind {
      StrategyKind::CashSecuredPut => (
        score >= self.min_sentiment,
        format!(">= {:.2}", self.min_sentiment),
      ),
      StrategyKind::IronCondor => (
        score.abs() <= self.condor_max_abs,
        format!("|score| <= {:.2}", self.condor_max_abs),
      ),
    };
    let reason = format!("sentiment {score:+.2} (needs {rule}): {}", reading.rationale);
    Ok(if passed {
      GateVerdict::pass(self.kind(), reason)
    } else {
      GateVerdict::reject(self.kind(), reason)
    })
  }
}

/// Account and exposure filter.
pub struct RiskGate {
  max_open_positions: usize,
}

impl RiskGate {
  pub fn new(config: &RiskConfig) -> Self {
    Self {
      max_open_positions: config.max_open_positions,
    }
  }
}

#[async_trait]
impl Gate for RiskGate {
  fn kind(&self) -> GateKind {
    GateKind::Risk
  }

  async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext) -> Result<GateVerdict> {
    let kind = self.kind();
    let account = &ctx.account;

    if ctx.risk.is_circuit_breaker_active(ctx.now) {
      return Ok(GateVerdict::reject(kind, "circuit breaker active"));
    }
    if !ctx.risk.can_trade(ctx.now) {
      return Ok(GateVerdict::reject(
        kind,
        format!("daily loss limit reached ({:.2})", ctx.risk.daily_loss()),
      ));
    }
    if account.trading_blocked {
      return Ok(GateVerdict::reject(kind, "account trading blocked"));
    }
    if ctx.open_option_positions >= self.max_open_positions {
      return Ok(GateVerdict::reject(
        kind,
        format!(
          "{} open option positions (max {})",
          ctx.open_option_positions, self.max_open_positions
        ),
      ));
    }

    let collateral = candidate.collateral_required();
    if !ctx
      .risk
      .collateral_allowed(collateral, account.options_buying_power)
    {
      return Ok(GateVerdict::reject(
        kind,
        format!(
          "collateral {collateral:.2} exceeds cap on options buying power {:.2}",
          account.options_buying_power
        ),
      ));
    }
    if ctx.risk.pdt_blocked(account) {
      return Ok(GateVerdict::reject(
        kind,
        format!(
          "PDT guard: equity {:.2} with {} day trades",
          account.equity, account.daytrade_count
        ),
      ));
    }

    Ok(GateVerdict::pass(
      kind,
      format!(
        "collateral {collateral:.2} of {:.2} buying power",
        account.options_buying_power
      ),
    ))
  }
}

/// Quote quality filter.
pub struct ExecutionGate {
  max_spread_pct: f64,
  min_credit: f64,
}

impl ExecutionGate {
  pub fn new(config: &GateConfig) -> Self {
    Self {
      max_spread_pct: config.max_spread_pct,
      min_credit: config.min_credit,
    }
  }
}

#[async_trait]
impl Gate for ExecutionGate {
  fn kind(&self) -> GateKind {
    GateKind::Execution
  }

  async fn evaluate(&self, candidate: &TradeCandidate, _ctx: &GateContext) -> Result<GateVerdict> {
    let kind = self.kind();
    for leg in &candidate.legs {
      let q = &leg.quote;
      let symbol = leg.symbol();
      if q.bid <= 0.0 {
        return Ok(GateVerdict::reject(kind, format!("{symbol}: no bid")));
      }
      if q.ask < q.bid {
        return Ok(GateVerdict::reject(
          kind,
          format!("{symbol}: crossed quote {:.2}/{:.2}", q.bid, q.ask),
        ));
      }
      let spread = q.spread_pct();
      if spread > self.max_spread_pct {
        return Ok(GateVerdict::reject(
          kind,
          format!(
            "{symbol}: spread {:.1}% above {:.1}%",
            spread * 100.0,
            self.max_spread_pct * 100.0
          ),
        ));
      }
    }

    let credit = candidate.net_credit();
    if credit < self.min_credit {
      return Ok(GateVerdict::reject(
        kind,
        format!("net credit {credit:.2} below {:.2}", self.min_credit),
      ));
    }
    Ok(GateVerdict::pass(kind, format!("net credit {credit:.2}")))
  }
}

/// Verdicts from one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
  /// Verdicts in evaluation order, up to and including the first rejection.
  pub verdicts: Vec<GateVerdict>,
  /// Gates in the pipeline.
  pub gate_count: usize,
}

impl PipelineOutcome {
  /// True only when every gate ran and passed.
  pub fn approved(&self) -> bool {
    self.gate_count > 0
      && self.verdicts.len() == self.gate_count
      && self.verdicts.iter().all(|v| v.passed)
  }

  /// The verdict that stopped the pipeline.
  pub fn rejection(&self) -> Option<&GateVerdict> {
    self.verdicts.iter().find(|v| !v.passed)
  }
}

/// Ordered gate chain.
pub struct GatePipeline {
  gates: Vec<Box<dyn Gate>>,
}

impl GatePipeline {
  pub fn new(gates: Vec<Box<dyn Gate>>) -> Self {
    Self { gates }
  }

  /// momentum → sentiment → risk → execution.
  pub fn standard(gates: &GateConfig, risk: &RiskConfig, advisor: Arc<dyn TradeAdvisor>) -> Self {
    Self::new(vec![
      Box::new(MomentumGate::new(gates)),
      Box::new(SentimentGate::new(advisor, gates)),
      Box::new(RiskGate::new(risk)),
      Box::new(ExecutionGate::new(gates)),
    ])
  }

  pub fn kinds(&self) -> Vec<GateKind> {
    self.gates.iter().map(|g| g.kind()).collect()
  }

  /// Run the gates in order, stopping at the first rejection.
  pub async fn evaluate(&self, candidate: &TradeCandidate, ctx: &GateContext) -> PipelineOutcome {
    let mut verdicts = Vec::with_capacity(self.gates.len());
    for gate in &self.gates {
      let verdict = match gate.evaluate(candidate, ctx).await {
        Ok(v) => v,
        Err(e) => {
          warn!(gate = %gate.kind(), error = %e, "Gate errored");
          GateVerdict::reject(gate.kind(), format!("gate error: {e:#}"))
        }
      };

      if verdict.passed {
        debug!(gate = %verdict.gate, reason = %verdict.reason, "Gate passed");
        verdicts.push(verdict);
      } else {
        info!(
          underlying = %candidate.underlying,
          gate = %verdict.gate,
          reason = %verdict.reason,
          "Candidate rejected"
        );
        verdicts.push(verdict);
        break;
      }
    }

    PipelineOutcome {
      verdicts,
      gate_count: self.gates.len(),
    }
  }
}
