// =============================================================================
// Shared types used across the funding sentinel
// =============================================================================

use serde::{Deserialize, Serialize};

/// How a source is queried during a fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryMode {
    /// One call returns every instrument's current rate.
    Bulk,
    /// One call per instrument; only queried for the phase-1 shortlist.
    Targeted,
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bulk => write!(f, "Bulk"),
            Self::Targeted => write!(f, "Targeted"),
        }
    }
}

/// Static description of a registered funding-rate source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique, stable identifier (e.g. "binance").
    pub id: String,
    /// Human-readable name used in error reports.
    pub display_name: String,
    pub query_mode: QueryMode,
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, query_mode: QueryMode) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            query_mode,
        }
    }
}

/// Raw per-pair record as reported by a source client, before timestamp
/// resolution and eligibility filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    /// Signed fraction (0.0001 = 0.01%). Records without a rate are dropped.
    pub funding_rate: Option<f64>,
    /// Settlement time the current rate applies to (ms), if reported.
    pub funding_timestamp: Option<i64>,
    /// The following settlement time (ms), if reported.
    pub next_funding_timestamp: Option<i64>,
    pub mark_price: Option<f64>,
    /// 24h quote volume, if reported.
    pub volume: Option<f64>,
}

/// One source's report for one instrument within one fetch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub source_id: String,
    pub source_name: String,
    /// Normalised base asset, e.g. "BTC".
    pub instrument_symbol: String,
    /// Unified pair id, e.g. "BTC/USDT:USDT".
    pub pair_identifier: String,
    pub funding_rate: f64,
    /// Resolved settlement time in epoch ms (estimated when unreported).
    pub next_settlement_timestamp: i64,
    pub mark_price: Option<f64>,
    pub volume: Option<f64>,
}

impl RateObservation {
    pub fn abs_rate(&self) -> f64 {
        self.funding_rate.abs()
    }
}

/// All observations for one instrument that survived filtering, most extreme
/// source first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentGroup {
    pub instrument_symbol: String,
    pub max_absolute_funding_rate: f64,
    pub earliest_settlement_timestamp: i64,
    pub observation_count: usize,
    pub observations: Vec<RateObservation>,
}

/// A source that failed or timed out during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub source_name: String,
    pub message: String,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source_name, self.message)
    }
}

/// Output of one fetch cycle: ranked groups plus one entry per failed source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchCycleResult {
    pub groups: Vec<InstrumentGroup>,
    pub source_errors: Vec<SourceFailure>,
}

/// Cycle result wrapped with summary metadata; this is what gets cached and
/// handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingSnapshot {
    pub groups: Vec<InstrumentGroup>,
    pub total_instruments: usize,
    /// Distinct sources contributing to at least one returned group.
    pub total_sources: usize,
    /// ISO 8601 timestamp.
    pub last_updated: String,
    /// "<source name>: <message>" per failed source.
    pub errors: Vec<String>,
}
