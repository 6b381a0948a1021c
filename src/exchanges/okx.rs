// =============================================================================
// OKX v5 Swap — targeted funding rates, one request per instrument
// =============================================================================
//
// GET /api/v5/public/instruments?instType=SWAP
//   { "code": "0", "data": [{ "instId": "BTC-USDT-SWAP", "settleCcy": "USDT" }, ...] }
// GET /api/v5/public/funding-rate?instId=BTC-USDT-SWAP
//   { "code": "0", "data": [{ "fundingRate": "0.0001", "fundingTime": "1709280000000",
//                            "nextFundingTime": "1709308800000" }] }
//
// `fundingTime` is the settlement the current rate applies to, so it maps to
// the preferred funding timestamp.
// =============================================================================

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{get_json, value_f64, value_i64};
use crate::error::SourceError;
use crate::sources::TargetedSource;
use crate::types::FundingRecord;

const BASE_URL: &str = "https://www.okx.com";

pub struct OkxSwapClient {
    base_url: String,
    client: reqwest::Client,
}

impl OkxSwapClient {
    /// Create a client that re-uses an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            client,
        }
    }

    async fn get_data(&self, path: &str) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let (_, body) = get_json(&self.client, &url).await?;
        unwrap_data(body)
    }

    #[instrument(skip(self), name = "okx::instruments")]
    async fn instruments(&self) -> Result<BTreeSet<String>> {
        let data = self.get_data("/api/v5/public/instruments?instType=SWAP").await?;
        let pairs: BTreeSet<String> = data
            .iter()
            .filter_map(|inst| inst_id_to_pair(inst["instId"].as_str()?, inst["settleCcy"].as_str()?))
            .collect();
        debug!(count = pairs.len(), "okx instruments fetched");
        Ok(pairs)
    }

    async fn funding_rate(&self, inst_id: &str) -> Result<Option<FundingRecord>> {
        let data = self
            .get_data(&format!("/api/v5/public/funding-rate?instId={inst_id}"))
            .await
            .with_context(|| format!("GET funding rate for {inst_id}"))?;
        Ok(data.first().map(parse_funding_entry))
    }
}

/// "BTC-USDT-SWAP" settled in USDT → "BTC/USDT:USDT".
pub fn inst_id_to_pair(inst_id: &str, settle: &str) -> Option<String> {
    let mut parts = inst_id.split('-');
    let (base, quote, kind) = (parts.next()?, parts.next()?, parts.next()?);
    if kind != "SWAP" || parts.next().is_some() || base.is_empty() || settle.is_empty() {
        return None;
    }
    Some(format!("{base}/{quote}:{settle}"))
}

/// "BTC/USDT:USDT" → "BTC-USDT-SWAP".
pub fn pair_to_inst_id(pair: &str) -> Option<String> {
    let (base, rest) = pair.split_once('/')?;
    let (quote, _) = rest.split_once(':')?;
    Some(format!("{base}-{quote}-SWAP"))
}

fn unwrap_data(body: Value) -> Result<Vec<Value>> {
    let code = body["code"].as_str().context("OKX response missing code")?;
    if code != "0" {
        anyhow::bail!(
            "OKX returned code {}: {}",
            code,
            body["msg"].as_str().unwrap_or("unknown error")
        );
    }
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => anyhow::bail!("OKX response missing data array"),
        },
        _ => anyhow::bail!("OKX response is not an object"),
    }
}

fn parse_funding_entry(entry: &Value) -> FundingRecord {
    FundingRecord {
        funding_rate: value_f64(&entry["fundingRate"]),
        funding_timestamp: value_i64(&entry["fundingTime"]).filter(|&t| t > 0),
        next_funding_timestamp: value_i64(&entry["nextFundingTime"]).filter(|&t| t > 0),
        mark_price: None,
        volume: None,
    }
}

#[async_trait]
impl TargetedSource for OkxSwapClient {
    async fn list_markets(&self) -> Result<BTreeSet<String>, SourceError> {
        Ok(self.instruments().await?)
    }

    async fn fetch_funding_rate(&self, pair: &str) -> Result<Option<FundingRecord>, SourceError> {
        let Some(inst_id) = pair_to_inst_id(pair) else {
            return Ok(None);
        };
        Ok(self.funding_rate(&inst_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn instrument_mapping() {
        assert_eq!(inst_id_to_pair("BTC-USDT-SWAP", "USDT").as_deref(), Some("BTC/USDT:USDT"));
        assert_eq!(inst_id_to_pair("BTC-USD-SWAP", "BTC").as_deref(), Some("BTC/USD:BTC"));
        assert_eq!(inst_id_to_pair("BTC-USDT-240628", "USDT"), None);
        assert_eq!(inst_id_to_pair("BTC-USDT", "USDT"), None);
        assert_eq!(pair_to_inst_id("ETH/USDT:USDT").as_deref(), Some("ETH-USDT-SWAP"));
    }

    #[test]
    fn parses_funding_entry() {
        let body = json!({"code": "0", "msg": "", "data": [
            {"instId": "BTC-USDT-SWAP", "fundingRate": "0.00075", "fundingTime": "1709280000000",
             "nextFundingTime": "1709308800000"}
        ]});
        let data = unwrap_data(body).unwrap();
        let record = parse_funding_entry(&data[0]);
        assert_eq!(record.funding_rate, Some(0.00075));
        assert_eq!(record.funding_timestamp, Some(1_709_280_000_000));
        assert_eq!(record.next_funding_timestamp, Some(1_709_308_800_000));
    }

    #[test]
    fn error_code_is_reported() {
        let body = json!({"code": "51001", "msg": "Instrument ID does not exist", "data": []});
        let err = unwrap_data(body).unwrap_err();
        assert!(err.to_string().contains("51001"));
    }
}
