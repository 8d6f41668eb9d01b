//! Service Wiring - Concrete Adapters Behind the Ports
//!
//! Builds the Alpaca brokerage, JSONL repository, lesson store and
//! advisor from config, and restores the shared risk state from the
//! latest snapshot.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::adapters::alpaca::{AlpacaBrokerage, AlpacaClient, AlpacaClientConfig, AlpacaCredentials};
use crate::adapters::lessons::JsonlLessonStore;
use crate::adapters::llm::NeutralAdvisor;
use crate::adapters::llm::anthropic::AnthropicAdvisor;
use crate::adapters::persistence::RepositoryImpl;
use crate::config::AppConfig;
use crate::domain::market_hours::MarketCalendar;
use crate::ports::advisor::TradeAdvisor;
use crate::ports::repository::Repository;
use crate::usecases::risk_manager::{RiskManager, SharedRiskManager};

/// Everything a job needs, wired once per process.
pub struct Services {
    pub broker: Arc<AlpacaBrokerage>,
    pub repo: Arc<RepositoryImpl>,
    pub lessons: Arc<JsonlLessonStore>,
    pub advisor: Arc<dyn TradeAdvisor>,
    pub risk: SharedRiskManager,
    pub calendar: MarketCalendar,
}

impl Services {
    /// Connect every adapter. Requires Alpaca credentials in the env.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let credentials = AlpacaCredentials::from_env()
            .context("Failed to load Alpaca credentials from env")?;
        info!(key_id = %credentials.key_id(), mode = ?config.bot.mode, "Alpaca credentials loaded");

        let client = AlpacaClient::new(credentials, AlpacaClientConfig::from(&config.broker))?;
        let broker = Arc::new(AlpacaBrokerage::new(
            Arc::new(client),
            config.broker.options_feed.clone(),
            config.broker.stock_feed.clone(),
        ));

        let repo = Arc::new(
            RepositoryImpl::from_data_dir(&config.persistence.data_dir)
                .await
                .context("Failed to open data directory")?,
        );
        let lessons = Arc::new(Self::lesson_store(config).await?);
        let advisor = Self::advisor(config)?;

        let restored = repo
            .load_latest_state()
            .await
            .context("Failed to load state snapshot")?
            .map(|s| s.risk)
            .unwrap_or_default();
        let risk = RiskManager::restore(&config.risk, &config.gates, restored).shared();

        let calendar =
            MarketCalendar::from_strings(&config.schedule.holidays, &config.schedule.half_days)?;

        Ok(Self {
            broker,
            repo,
            lessons,
            advisor,
            risk,
            calendar,
        })
    }

    /// Lesson store only; needs no broker credentials.
    pub async fn lesson_store(config: &AppConfig) -> Result<JsonlLessonStore> {
        JsonlLessonStore::new(Path::new(&config.lessons.path))
            .await
            .with_context(|| format!("Failed to open lesson store {}", config.lessons.path))
    }

    /// Claude advisor when enabled, neutral otherwise.
    ///
    /// An enabled advisor without an API key is a startup error.
    fn advisor(config: &AppConfig) -> Result<Arc<dyn TradeAdvisor>> {
        if !config.llm.enabled {
            warn!("LLM advisor disabled, sentiment gate uses neutral readings");
            return Ok(Arc::new(NeutralAdvisor));
        }
        let advisor = AnthropicAdvisor::from_env(&config.llm)
            .context("Failed to configure LLM advisor (set llm.enabled = false to run without it)")?;
        info!(model = %config.llm.model, "LLM advisor enabled");
        Ok(Arc::new(advisor))
    }
}
