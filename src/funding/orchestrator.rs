// =============================================================================
// Fetch Orchestrator — two-phase, failure-isolated funding-rate collection
// =============================================================================
//
// Phase 1 queries every bulk source concurrently, each under its own timeout.
// The phase-1 observations that are significant and settle inside the
// lookahead window form a shortlist of instruments.  Phase 2 then queries
// every targeted source concurrently for the shortlisted instruments only,
// with at most `targeted_concurrency` requests in flight per source.
//
// Failure policy:
//   - A source that errors or times out yields one `SourceFailure` and no
//     observations.  Siblings are never cancelled.
//   - Inside a targeted source, individual pair requests that fail are
//     dropped; only a source-level failure (market listing, timeout) is
//     recorded.
// =============================================================================

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::aggregator::{aggregate, settles_within};
use super::settlement::{perpetual_pair, to_observation};
use crate::error::SourceError;
use crate::runtime_config::RuntimeConfig;
use crate::sources::{RegisteredSource, SourceClient, SourceRegistry, TargetedSource};
use crate::types::{FetchCycleResult, QueryMode, RateObservation, SourceFailure};

/// Quote currency used when matching shortlisted instruments on targeted sources.
const TARGETED_QUOTE: &str = "USDT";

/// Parameters of one fetch cycle.
#[derive(Debug, Clone)]
pub struct FetchParams {
    pub significance_threshold: f64,
    pub lookahead_window_ms: i64,
    /// Applied independently to every source call in both phases.
    pub source_timeout: Duration,
    /// Max in-flight requests per targeted source.
    pub targeted_concurrency: usize,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            significance_threshold: 0.0005,
            lookahead_window_ms: 3_600_000,
            source_timeout: Duration::from_secs(45),
            targeted_concurrency: 10,
        }
    }
}

impl FetchParams {
    /// Parameters for `config`.  The per-source timeout is capped at a third
    /// of the invocation budget so both phases, the calendar fetch and the
    /// pushes fit inside one invocation.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let phase_cap = (Duration::from_secs(config.invocation_budget_secs) / 3).max(Duration::from_secs(1));
        Self {
            significance_threshold: config.significance_threshold,
            lookahead_window_ms: config.lookahead_window_ms,
            source_timeout: Duration::from_secs(config.source_timeout_secs).min(phase_cap),
            targeted_concurrency: config.targeted_concurrency.max(1),
        }
    }
}

/// Run a full fetch cycle against `registry` using the wall clock.
pub async fn run_fetch_cycle(registry: &SourceRegistry, params: &FetchParams) -> FetchCycleResult {
    run_fetch_cycle_at(registry, params, Utc::now().timestamp_millis()).await
}

/// Run a full fetch cycle as seen at `now_ms`.
pub async fn run_fetch_cycle_at(
    registry: &SourceRegistry,
    params: &FetchParams,
    now_ms: i64,
) -> FetchCycleResult {
    let mut observations: Vec<RateObservation> = Vec::new();
    let mut source_errors: Vec<SourceFailure> = Vec::new();

    // ── Phase 1: bulk ────────────────────────────────────────────────────
    let bulk = registry.sources_by_mode(QueryMode::Bulk);
    let no_shortlist = BTreeSet::new();
    let outcomes = join_all(bulk.iter().map(|source| {
        query_source(source, &no_shortlist, params, now_ms)
    }))
    .await;
    collect_outcomes(&bulk, outcomes, &mut observations, &mut source_errors);

    let shortlist = derive_shortlist(&observations, params, now_ms);
    info!(
        bulk_sources = bulk.len(),
        observations = observations.len(),
        shortlist = shortlist.len(),
        failed = source_errors.len(),
        "phase 1 complete"
    );

    // ── Phase 2: targeted, restricted to the shortlist ───────────────────
    let targeted = registry.sources_by_mode(QueryMode::Targeted);
    if !shortlist.is_empty() && !targeted.is_empty() {
        let outcomes = join_all(targeted.iter().map(|source| {
            query_source(source, &shortlist, params, now_ms)
        }))
        .await;
        collect_outcomes(&targeted, outcomes, &mut observations, &mut source_errors);
        debug!(targeted_sources = targeted.len(), "phase 2 complete");
    } else {
        debug!(shortlist = shortlist.len(), "phase 2 skipped");
    }

    let total = observations.len();
    let groups = aggregate(
        observations,
        params.significance_threshold,
        params.lookahead_window_ms,
        now_ms,
    );

    info!(
        observations = total,
        instruments = groups.len(),
        failed_sources = source_errors.len(),
        "fetch cycle complete"
    );

    FetchCycleResult {
        groups,
        source_errors,
    }
}

/// Distinct instruments from phase 1 that are significant and settle within
/// the lookahead window.
pub fn derive_shortlist(
    observations: &[RateObservation],
    params: &FetchParams,
    now_ms: i64,
) -> BTreeSet<String> {
    observations
        .iter()
        .filter(|o| {
            settles_within(o.next_settlement_timestamp, now_ms, params.lookahead_window_ms)
                && o.abs_rate() >= params.significance_threshold
        })
        .map(|o| o.instrument_symbol.clone())
        .collect()
}

fn collect_outcomes(
    sources: &[&RegisteredSource],
    outcomes: Vec<Result<Vec<RateObservation>, SourceError>>,
    observations: &mut Vec<RateObservation>,
    source_errors: &mut Vec<SourceFailure>,
) {
    for (source, outcome) in sources.iter().zip(outcomes) {
        match outcome {
            Ok(batch) => {
                debug!(source = %source.id(), count = batch.len(), "source query succeeded");
                observations.extend(batch);
            }
            Err(e) => {
                warn!(source = %source.id(), error = %e, "source query failed");
                source_errors.push(SourceFailure {
                    source_id: source.id().to_string(),
                    source_name: source.name().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Query one source under its own timeout.
async fn query_source(
    source: &RegisteredSource,
    shortlist: &BTreeSet<String>,
    params: &FetchParams,
    now_ms: i64,
) -> Result<Vec<RateObservation>, SourceError> {
    with_timeout(
        params.source_timeout,
        query_unbounded(source, shortlist, params, now_ms),
    )
    .await
}

async fn query_unbounded(
    source: &RegisteredSource,
    shortlist: &BTreeSet<String>,
    params: &FetchParams,
    now_ms: i64,
) -> Result<Vec<RateObservation>, SourceError> {
    match &source.client {
        SourceClient::Bulk(client) => {
            let records = client.list_funding_rates().await?;
            Ok(records
                .iter()
                .filter_map(|(pair, record)| to_observation(&source.descriptor, pair, record, now_ms))
                .collect())
        }
        SourceClient::Targeted(client) => {
            query_targeted(source, client.as_ref(), shortlist, params, now_ms).await
        }
    }
}

async fn query_targeted(
    source: &RegisteredSource,
    client: &dyn TargetedSource,
    shortlist: &BTreeSet<String>,
    params: &FetchParams,
    now_ms: i64,
) -> Result<Vec<RateObservation>, SourceError> {
    let markets = client.list_markets().await?;
    let pairs: Vec<String> = shortlist
        .iter()
        .map(|symbol| perpetual_pair(symbol, TARGETED_QUOTE))
        .filter(|pair| markets.contains(pair))
        .collect();

    let requested = pairs.len();
    let responses: Vec<_> = stream::iter(pairs)
        .map(|pair| async move {
            let response = client.fetch_funding_rate(&pair).await;
            (pair, response)
        })
        .buffered(params.targeted_concurrency.max(1))
        .collect()
        .await;

    let mut observations = Vec::with_capacity(responses.len());
    for (pair, response) in responses {
        match response {
            Ok(Some(record)) => {
                if let Some(obs) = to_observation(&source.descriptor, &pair, &record, now_ms) {
                    observations.push(obs);
                }
            }
            Ok(None) => {}
            Err(e) => debug!(source = %source.id(), pair = %pair, error = %e, "targeted request dropped"),
        }
    }

    debug!(
        source = %source.id(),
        requested,
        returned = observations.len(),
        "targeted query finished"
    );
    Ok(observations)
}

async fn with_timeout<T>(
    limit: Duration,
    work: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit.as_millis() as u64)),
    }
}
