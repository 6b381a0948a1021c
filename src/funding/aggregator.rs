// =============================================================================
// Rate Aggregator — group, filter and rank observations per instrument
// =============================================================================
//
//   1. Drop observations with a non-finite rate or settling outside
//      (now, now + lookahead].
//   2. Group the rest by instrument symbol (first-seen order).
//   3. Drop groups whose max |rate| is below the significance threshold.
//   4. Rank observations within a group by |rate| descending.
//   5. Rank groups by max |rate| descending.
//
// Both sorts are stable, so ties keep source-arrival / grouping order.
// =============================================================================

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::types::{FetchCycleResult, FundingSnapshot, InstrumentGroup, RateObservation};

/// `true` if `timestamp` lies in `(now, now + lookahead]`.
pub fn settles_within(timestamp: i64, now_ms: i64, lookahead_window_ms: i64) -> bool {
    timestamp > now_ms && timestamp <= now_ms.saturating_add(lookahead_window_ms)
}

/// Group, filter and rank `observations` as seen at `now_ms`.
pub fn aggregate(
    observations: Vec<RateObservation>,
    significance_threshold: f64,
    lookahead_window_ms: i64,
    now_ms: i64,
) -> Vec<InstrumentGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(String, Vec<RateObservation>)> = Vec::new();

    for obs in observations {
        if !obs.funding_rate.is_finite() {
            continue;
        }
        if !settles_within(obs.next_settlement_timestamp, now_ms, lookahead_window_ms) {
            continue;
        }
        match index.get(&obs.instrument_symbol) {
            Some(&i) => buckets[i].1.push(obs),
            None => {
                index.insert(obs.instrument_symbol.clone(), buckets.len());
                buckets.push((obs.instrument_symbol.clone(), vec![obs]));
            }
        }
    }

    let mut groups: Vec<InstrumentGroup> = buckets
        .into_iter()
        .filter_map(|(symbol, mut observations)| {
            let max_abs = observations.iter().map(|o| o.abs_rate()).fold(0.0_f64, f64::max);
            if max_abs < significance_threshold {
                return None;
            }

            observations.sort_by(|a, b| b.abs_rate().total_cmp(&a.abs_rate()));
            let earliest = observations
                .iter()
                .map(|o| o.next_settlement_timestamp)
                .min()
                .unwrap_or(i64::MAX);

            Some(InstrumentGroup {
                instrument_symbol: symbol,
                max_absolute_funding_rate: max_abs,
                earliest_settlement_timestamp: earliest,
                observation_count: observations.len(),
                observations,
            })
        })
        .collect();

    groups.sort_by(|a, b| b.max_absolute_funding_rate.total_cmp(&a.max_absolute_funding_rate));
    groups
}

/// Wrap a cycle result with summary metadata.
pub fn build_snapshot(result: FetchCycleResult, now: DateTime<Utc>) -> FundingSnapshot {
    let total_sources = result
        .groups
        .iter()
        .flat_map(|g| g.observations.iter().map(|o| o.source_id.as_str()))
        .collect::<BTreeSet<_>>()
        .len();

    FundingSnapshot {
        total_instruments: result.groups.len(),
        total_sources,
        last_updated: now.to_rfc3339(),
        errors: result.source_errors.iter().map(|e| e.to_string()).collect(),
        groups: result.groups,
    }
}
