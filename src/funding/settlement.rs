// =============================================================================
// Settlement Resolution — turn raw source records into observations
// =============================================================================
//
// Settlement timestamp preference, per record:
//   1. reported funding timestamp, if strictly in the future
//   2. reported next-funding timestamp, if strictly in the future
//   3. estimate: next 00:00 / 08:00 / 16:00 UTC boundary after now
//
// Only USDT- or USDC-margined perpetuals (`BASE/QUOTE:SETTLE` with
// QUOTE == SETTLE and no expiry suffix) become observations.
// =============================================================================

use crate::types::{FundingRecord, RateObservation, SourceDescriptor};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;
/// Most venues settle every 8 hours starting at 00:00 UTC.
const FUNDING_INTERVAL_MS: i64 = 8 * HOUR_MS;

const ELIGIBLE_QUOTES: [&str; 2] = ["USDT", "USDC"];

/// First 8-hour boundary (anchored at 00:00 UTC) strictly after `now_ms`.
pub fn estimate_next_funding(now_ms: i64) -> i64 {
    let day_start = now_ms
        .checked_sub(now_ms.rem_euclid(DAY_MS))
        .unwrap_or(i64::MIN);
    (0..4)
        .map(|i| day_start.saturating_add(i * FUNDING_INTERVAL_MS))
        .find(|&t| t > now_ms)
        .unwrap_or_else(|| day_start.saturating_add(DAY_MS))
}

/// Settlement time for `record` as seen at `now_ms`.
pub fn resolve_settlement(record: &FundingRecord, now_ms: i64) -> i64 {
    record
        .funding_timestamp
        .filter(|&t| t > now_ms)
        .or_else(|| record.next_funding_timestamp.filter(|&t| t > now_ms))
        .unwrap_or_else(|| estimate_next_funding(now_ms))
}

/// `true` for linear USDT/USDC perpetual pair ids such as "BTC/USDT:USDT".
pub fn is_eligible_pair(pair: &str) -> bool {
    let Some((base, rest)) = pair.split_once('/') else {
        return false;
    };
    let Some((quote, settle)) = rest.split_once(':') else {
        return false;
    };
    !base.is_empty() && ELIGIBLE_QUOTES.contains(&quote) && settle == quote
}

/// Normalised base asset of a unified pair id.
pub fn instrument_symbol(pair: &str) -> Option<String> {
    pair.split_once('/')
        .map(|(base, _)| base.trim().to_uppercase())
        .filter(|base| !base.is_empty())
}

/// Unified linear-perpetual pair id for `symbol` settled in `quote`.
pub fn perpetual_pair(symbol: &str, quote: &str) -> String {
    format!("{symbol}/{quote}:{quote}")
}

/// Build an observation, or `None` if the pair is ineligible or the record
/// carries no usable rate.
pub fn to_observation(
    source: &SourceDescriptor,
    pair: &str,
    record: &FundingRecord,
    now_ms: i64,
) -> Option<RateObservation> {
    if !is_eligible_pair(pair) {
        return None;
    }
    let funding_rate = record.funding_rate.filter(|r| r.is_finite())?;
    let instrument_symbol = instrument_symbol(pair)?;

    Some(RateObservation {
        source_id: source.id.clone(),
        source_name: source.display_name.clone(),
        instrument_symbol,
        pair_identifier: pair.to_string(),
        funding_rate,
        next_settlement_timestamp: resolve_settlement(record, now_ms),
        mark_price: record.mark_price,
        volume: record.volume,
    })
}
