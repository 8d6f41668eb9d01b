//! Alpaca Brokerage - Adapter for the `Brokerage` Port
//!
//! Implements the `Brokerage` port using the shared `AlpacaClient`
//! for authenticated, rate-limited requests. Every response is decoded
//! through the typed schemas in `types`; nothing is read by string key.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use super::BrokerError;
use super::client::{AlpacaClient, Api};
use super::types::{
    AccountResponse, BarsResponse, LatestTradeResponse, OrderRequest, OrderResponse,
    PositionResponse, SnapshotsResponse,
};
use crate::domain::strategy::OptionQuote;
use crate::domain::trade::OptionOrder;
use crate::ports::brokerage::{
    AccountSnapshot, BrokerPosition, Brokerage, OpenOrder, OrderCancellation, OrderPlacement,
};

/// Maximum contracts per snapshot page.
const SNAPSHOT_PAGE_LIMIT: u32 = 1000;
/// Maximum bars per page.
const BARS_PAGE_LIMIT: u32 = 1000;
/// Guard against a server that never stops paginating.
const MAX_PAGES: usize = 50;

/// Alpaca brokerage backed by the shared authenticated client.
pub struct AlpacaBrokerage {
    /// Shared Alpaca client with auth + retry.
    client: Arc<AlpacaClient>,
    /// Option snapshot feed ("indicative" or "opra").
    options_feed: String,
    /// Stock data feed ("iex" or "sip").
    stock_feed: String,
}

impl AlpacaBrokerage {
    pub fn new(
        client: Arc<AlpacaClient>,
        options_feed: impl Into<String>,
        stock_feed: impl Into<String>,
    ) -> Self {
        Self {
            client,
            options_feed: options_feed.into(),
            stock_feed: stock_feed.into(),
        }
    }
}

#[async_trait]
impl Brokerage for AlpacaBrokerage {
    #[instrument(skip(self))]
    async fn account(&self) -> Result<AccountSnapshot> {
        let raw: AccountResponse = self
            .client
            .get_json(Api::Trading, "/v2/account", &[])
            .await
            .context("Failed to fetch account")?;
        Ok(AccountSnapshot::try_from(raw)?)
    }

    #[instrument(skip(self))]
    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let raw: Vec<PositionResponse> = self
            .client
            .get_json(Api::Trading, "/v2/positions", &[])
            .await
            .context("Failed to fetch positions")?;
        let positions = raw
            .into_iter()
            .map(BrokerPosition::try_from)
            .collect::<Result<Vec<_>, BrokerError>>()?;
        debug!(count = positions.len(), "Fetched positions");
        Ok(positions)
    }

    #[instrument(skip(self))]
    async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        let query = [
            ("status", "open".to_string()),
            ("nested", "true".to_string()),
            ("limit", "500".to_string()),
        ];
        let raw: Vec<OrderResponse> = self
            .client
            .get_json(Api::Trading, "/v2/orders", &query)
            .await
            .context("Failed to fetch open orders")?;
        Ok(raw
            .into_iter()
            .map(OpenOrder::try_from)
            .collect::<Result<Vec<_>, BrokerError>>()?)
    }

    #[instrument(skip(self, order), fields(client_order_id = %order.client_order_id, legs = order.legs.len(), limit = order.limit_price))]
    async fn place_order(&self, order: &OptionOrder) -> Result<OrderPlacement> {
        anyhow::ensure!(!order.legs.is_empty(), "Order has no legs");
        anyhow::ensure!(
            order.limit_price > 0.0,
            "Order limit price must be positive, got {}",
            order.limit_price
        );

        let body = OrderRequest::from(order);
        let raw: OrderResponse = self
            .client
            .post_json(Api::Trading, "/v2/orders", &body)
            .await
            .context("Failed to place order")?;

        info!(
            order_id = %raw.id,
            status = ?raw.status,
            multi_leg = order.is_multi_leg(),
            "Order placed"
        );

        Ok(OrderPlacement {
            order_id: raw.id,
            client_order_id: raw.client_order_id,
            status: raw.status,
            dry_run: false,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> Result<OrderCancellation> {
        let path = format!("/v2/orders/{order_id}");
        match self.client.delete(Api::Trading, &path).await {
            Ok(()) => Ok(OrderCancellation {
                order_id: order_id.to_string(),
                success: true,
                error: None,
            }),
            // 404: already gone; 422: no longer cancelable (filled).
            Err(BrokerError::Api { status, body }) if status == 404 || status == 422 => {
                warn!(order_id, status, "Order could not be cancelled");
                Ok(OrderCancellation {
                    order_id: order_id.to_string(),
                    success: false,
                    error: Some(format!("{status}: {body}")),
                })
            }
            Err(e) => Err(e).with_context(|| format!("Failed to cancel order {order_id}")),
        }
    }

    #[instrument(skip(self))]
    async fn daily_closes(&self, symbol: &str, lookback: usize) -> Result<Vec<f64>> {
        // Calendar span wide enough for `lookback` sessions plus holidays.
        let span_days = i64::try_from(lookback).unwrap_or(i64::MAX / 2) * 7 / 5 + 10;
        let start = (Utc::now() - Duration::days(span_days)).date_naive();
        let path = format!("/v2/stocks/{symbol}/bars");

        let mut closes = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("timeframe", "1Day".to_string()),
                ("start", start.to_string()),
                ("limit", BARS_PAGE_LIMIT.to_string()),
                ("adjustment", "split".to_string()),
                ("feed", self.stock_feed.clone()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }
            let page: BarsResponse = self
                .client
                .get_json(Api::Data, &path, &query)
                .await
                .with_context(|| format!("Failed to fetch bars for {symbol}"))?;
            closes.extend(page.bars.unwrap_or_default().into_iter().map(|b| b.c));
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        let skip = closes.len().saturating_sub(lookback);
        Ok(closes.split_off(skip))
    }

    #[instrument(skip(self))]
    async fn latest_price(&self, symbol: &str) -> Result<f64> {
        let path = format!("/v2/stocks/{symbol}/trades/latest");
        let query = [("feed", self.stock_feed.clone())];
        let raw: LatestTradeResponse = self
            .client
            .get_json(Api::Data, &path, &query)
            .await
            .with_context(|| format!("Failed to fetch latest trade for {symbol}"))?;
        anyhow::ensure!(
            raw.trade.p.is_finite() && raw.trade.p > 0.0,
            "Latest trade for {symbol} has invalid price {}",
            raw.trade.p
        );
        Ok(raw.trade.p)
    }

    #[instrument(skip(self))]
    async fn option_chain(
        &self,
        underlying: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OptionQuote>> {
        let path = format!("/v1beta1/options/snapshots/{underlying}");
        let mut quotes = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("feed", self.options_feed.clone()),
                ("expiration_date_gte", from.to_string()),
                ("expiration_date_lte", to.to_string()),
                ("limit", SNAPSHOT_PAGE_LIMIT.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }
            let mut page: SnapshotsResponse = self
                .client
                .get_json(Api::Data, &path, &query)
                .await
                .with_context(|| format!("Failed to fetch option chain for {underlying}"))?;
            page_token = page.next_page_token.take();
            quotes.extend(page.into_quotes());
            if page_token.is_none() {
                break;
            }
        }

        debug!(underlying, contracts = quotes.len(), "Fetched option chain");
        Ok(quotes)
    }

    async fn is_healthy(&self) -> bool {
        self.client.health_check().await
    }
}
