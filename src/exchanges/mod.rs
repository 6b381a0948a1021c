// =============================================================================
// Exchange Adapters — reference funding-rate sources over public REST APIs
// =============================================================================
//
//   binance  — Bulk (premiumIndex, all symbols in one call)
//   bybit    — Bulk (v5 linear tickers)
//   okx      — Targeted (v5 funding-rate per instrument)
//
// All adapters share one `reqwest::Client`; none of them sign requests.
// =============================================================================

pub mod binance;
pub mod bybit;
pub mod okx;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::sources::{RegisteredSource, SourceRegistry};

/// Per-request HTTP timeout.  The orchestrator applies its own per-source
/// deadline on top of this.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Source ids this build knows how to construct.
pub const KNOWN_SOURCES: [&str; 3] = ["binance", "bybit", "okx"];

/// Build the registry for the `enabled` source ids, in the given order.
/// Unknown ids are logged and skipped.
pub fn build_registry(enabled: &[String]) -> Result<SourceRegistry> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let mut sources = Vec::with_capacity(enabled.len());
    for id in enabled {
        match id.as_str() {
            "binance" => sources.push(RegisteredSource::bulk(
                "binance",
                "Binance",
                Arc::new(binance::BinanceFuturesClient::with_client(client.clone())),
            )),
            "bybit" => sources.push(RegisteredSource::bulk(
                "bybit",
                "Bybit",
                Arc::new(bybit::BybitLinearClient::with_client(client.clone())),
            )),
            "okx" => sources.push(RegisteredSource::targeted(
                "okx",
                "OKX",
                Arc::new(okx::OkxSwapClient::with_client(client.clone())),
            )),
            other => warn!(source = %other, known = ?KNOWN_SOURCES, "unknown source id ignored"),
        }
    }

    let registry = SourceRegistry::new(sources);
    info!(sources = registry.len(), "source registry built");
    Ok(registry)
}

/// GET `url` and parse the body as JSON.  Non-2xx statuses become errors
/// carrying the response body.
pub(crate) async fn get_json(client: &reqwest::Client, url: &str) -> Result<(HeaderMap, Value)> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| e.without_url())
        .context("GET request failed")?;

    let status = resp.status();
    let headers = resp.headers().clone();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| e.without_url())
        .context("failed to parse JSON response")?;

    if !status.is_success() {
        anyhow::bail!("upstream returned {}: {}", status, body);
    }

    Ok((headers, body))
}

/// Exchanges quote numbers either as JSON numbers or as decimal strings;
/// empty strings mean "no value".
pub(crate) fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if !s.is_empty() => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::QueryMode;

    #[test]
    fn numeric_values_accept_strings_and_numbers() {
        assert_eq!(value_f64(&json!("0.0001")), Some(0.0001));
        assert_eq!(value_f64(&json!(-0.5)), Some(-0.5));
        assert_eq!(value_f64(&json!("")), None);
        assert_eq!(value_f64(&json!(null)), None);
        assert_eq!(value_f64(&json!("abc")), None);

        assert_eq!(value_i64(&json!("1709280000000")), Some(1_709_280_000_000));
        assert_eq!(value_i64(&json!(1709280000000_i64)), Some(1_709_280_000_000));
        assert_eq!(value_i64(&json!("")), None);
    }

    #[test]
    fn registry_follows_enabled_order_and_skips_unknown() {
        let enabled: Vec<String> = ["okx", "kraken", "binance", "okx"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let registry = build_registry(&enabled).unwrap();

        let ids: Vec<&str> = registry.list_sources().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["okx", "binance"]);
        assert_eq!(registry.sources_by_mode(QueryMode::Targeted).len(), 1);
        assert_eq!(registry.sources_by_mode(QueryMode::Bulk).len(), 1);
    }

    #[test]
    fn venues_without_an_adapter_are_skipped() {
        let enabled: Vec<String> = ["gate", "bitget", "htx", "bybit"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let registry = build_registry(&enabled).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_sources()[0].id, "bybit");
    }
}
