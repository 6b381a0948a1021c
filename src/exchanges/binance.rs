// =============================================================================
// Binance USDⓈ-M Futures — public funding-rate client
// =============================================================================
//
// GET /fapi/v1/premiumIndex returns, per symbol:
//   { "symbol": "BTCUSDT", "markPrice": "64000.1", "lastFundingRate": "0.0001",
//     "nextFundingTime": 1709280000000, ... }
// Without `symbol` it returns every contract (weight 10); with it, one object
// (weight 1).  Delivery contracts ("BTCUSDT_240628") are skipped.
// =============================================================================

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::rate_limit::RateLimitTracker;
use super::{get_json, value_f64, value_i64};
use crate::error::SourceError;
use crate::funding::settlement::perpetual_pair;
use crate::sources::{BulkSource, TargetedSource};
use crate::types::FundingRecord;

const BASE_URL: &str = "https://fapi.binance.com";
const WEIGHT_ALL_SYMBOLS: u32 = 10;
const WEIGHT_ONE_SYMBOL: u32 = 1;
const QUOTES: [&str; 2] = ["USDT", "USDC"];

/// Public (unsigned) Binance futures client.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl BinanceFuturesClient {
    /// Create a client that re-uses an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        }
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    /// GET /fapi/v1/premiumIndex, optionally for a single symbol.
    #[instrument(skip(self), name = "binance::premium_index")]
    async fn premium_index(&self, symbol: Option<&str>) -> Result<Value, SourceError> {
        let weight = if symbol.is_some() { WEIGHT_ONE_SYMBOL } else { WEIGHT_ALL_SYMBOLS };
        if !self.rate_limit.can_send_request(weight) {
            return Err(SourceError::RateLimited(format!(
                "Binance request weight at {}",
                self.rate_limit.snapshot().used_weight_1m
            )));
        }

        let url = match symbol {
            Some(s) => format!("{}/fapi/v1/premiumIndex?symbol={}", self.base_url, s),
            None => format!("{}/fapi/v1/premiumIndex", self.base_url),
        };
        let (headers, body) = get_json(&self.client, &url).await?;
        self.rate_limit.update_from_headers(&headers);
        Ok(body)
    }

    async fn all_entries(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError> {
        let body = self.premium_index(None).await?;
        let entries = parse_premium_index(&body)?;
        debug!(count = entries.len(), "binance premium index fetched");
        Ok(entries)
    }
}

/// Unified pair id for a Binance perpetual symbol, e.g. "BTCUSDT" → "BTC/USDT:USDT".
pub fn symbol_to_pair(symbol: &str) -> Option<String> {
    if symbol.contains('_') {
        return None;
    }
    QUOTES.iter().find_map(|quote| {
        symbol
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| perpetual_pair(base, quote))
    })
}

/// Binance symbol for a unified pair id, e.g. "BTC/USDT:USDT" → "BTCUSDT".
pub fn pair_to_symbol(pair: &str) -> Option<String> {
    let (base, rest) = pair.split_once('/')?;
    let (quote, _) = rest.split_once(':')?;
    Some(format!("{base}{quote}"))
}

fn parse_entry(entry: &Value) -> Option<(String, FundingRecord)> {
    let pair = symbol_to_pair(entry["symbol"].as_str()?)?;
    let record = FundingRecord {
        funding_rate: value_f64(&entry["lastFundingRate"]),
        funding_timestamp: None,
        next_funding_timestamp: value_i64(&entry["nextFundingTime"]).filter(|&t| t > 0),
        mark_price: value_f64(&entry["markPrice"]),
        volume: None,
    };
    Some((pair, record))
}

/// Record from a single-symbol premiumIndex payload (one object, not an array).
fn parse_single_entry(body: &Value) -> Option<FundingRecord> {
    body.as_object()?;
    parse_entry(body).map(|(_, record)| record)
}

fn parse_premium_index(body: &Value) -> Result<BTreeMap<String, FundingRecord>> {
    let entries = body
        .as_array()
        .context("premium index response is not an array")?;
    Ok(entries.iter().filter_map(parse_entry).collect())
}

#[async_trait]
impl BulkSource for BinanceFuturesClient {
    async fn list_funding_rates(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError> {
        self.all_entries().await
    }
}

#[async_trait]
impl TargetedSource for BinanceFuturesClient {
    async fn list_markets(&self) -> Result<BTreeSet<String>, SourceError> {
        Ok(self.all_entries().await?.into_keys().collect())
    }

    async fn fetch_funding_rate(&self, pair: &str) -> Result<Option<FundingRecord>, SourceError> {
        let Some(symbol) = pair_to_symbol(pair) else {
            return Ok(None);
        };
        let body = self.premium_index(Some(&symbol)).await?;
        Ok(parse_single_entry(&body))
    }
}
