// =============================================================================
// Bybit v5 Linear — bulk funding rates from the tickers endpoint
// =============================================================================
//
// GET /v5/market/tickers?category=linear
//   { "retCode": 0, "retMsg": "OK", "result": { "list": [
//       { "symbol": "BTCUSDT", "fundingRate": "0.0001", "nextFundingTime": "1709280000000",
//         "markPrice": "64000", "turnover24h": "123456789.5" }, ... ] } }
//
// USDT perpetuals are "<BASE>USDT"; USDC perpetuals are "<BASE>PERP".
// Dated futures ("BTC-28JUN24") carry no funding and are skipped.
// =============================================================================

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{get_json, value_f64, value_i64};
use crate::error::SourceError;
use crate::funding::settlement::perpetual_pair;
use crate::sources::BulkSource;
use crate::types::FundingRecord;

const BASE_URL: &str = "https://api.bybit.com";

pub struct BybitLinearClient {
    base_url: String,
    client: reqwest::Client,
}

impl BybitLinearClient {
    /// Create a client that re-uses an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            client,
        }
    }

    #[instrument(skip(self), name = "bybit::tickers")]
    async fn tickers(&self) -> Result<BTreeMap<String, FundingRecord>> {
        let url = format!("{}/v5/market/tickers?category=linear", self.base_url);
        let (_, body) = get_json(&self.client, &url).await?;
        let entries = parse_tickers(&body)?;
        debug!(count = entries.len(), "bybit tickers fetched");
        Ok(entries)
    }
}

/// Unified pair id for a Bybit linear symbol.
pub fn symbol_to_pair(symbol: &str) -> Option<String> {
    if symbol.contains('-') {
        return None;
    }
    if let Some(base) = symbol.strip_suffix("USDT").filter(|b| !b.is_empty()) {
        return Some(perpetual_pair(base, "USDT"));
    }
    symbol
        .strip_suffix("PERP")
        .filter(|b| !b.is_empty())
        .map(|base| perpetual_pair(base, "USDC"))
}

fn parse_tickers(body: &Value) -> Result<BTreeMap<String, FundingRecord>> {
    let code = body["retCode"].as_i64().context("tickers response missing retCode")?;
    if code != 0 {
        anyhow::bail!(
            "Bybit tickers returned retCode {}: {}",
            code,
            body["retMsg"].as_str().unwrap_or("unknown error")
        );
    }

    let list = body["result"]["list"]
        .as_array()
        .context("tickers response missing result.list")?;

    Ok(list
        .iter()
        .filter_map(|entry| {
            let pair = symbol_to_pair(entry["symbol"].as_str()?)?;
            let record = FundingRecord {
                funding_rate: value_f64(&entry["fundingRate"]),
                funding_timestamp: None,
                next_funding_timestamp: value_i64(&entry["nextFundingTime"]).filter(|&t| t > 0),
                mark_price: value_f64(&entry["markPrice"]),
                volume: value_f64(&entry["turnover24h"]),
            };
            Some((pair, record))
        })
        .collect())
}

#[async_trait]
impl BulkSource for BybitLinearClient {
    async fn list_funding_rates(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError> {
        Ok(self.tickers().await?)
    }
}
