// =============================================================================
// Central Application State — Funding Sentinel
// =============================================================================
//
// Everything that outlives a single invocation lives here and is injected
// explicitly; there are no module statics.  The host builds one `AppState`,
// wraps it in an `Arc`, and hands it to every invocation.
//
// Cross-invocation mutable state:
//   - funding_cache   60 s snapshot of the last fetch cycle
//   - calendar_cache  300 s copy of the event catalog
//   - alert_seen      identity keys of events already alerted
// Each guards its own check-then-act sequence.
// =============================================================================

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info};

use crate::alerts::{AlertSeenSet, EventCatalog, EventFilter, NotificationSink, ScheduledEvent, SeverityFilter};
use crate::cache::TtlCache;
use crate::error::CatalogError;
use crate::funding::{build_snapshot, run_fetch_cycle_at, FetchParams};
use crate::runtime_config::RuntimeConfig;
use crate::sources::SourceRegistry;
use crate::types::FundingSnapshot;

/// Process-wide state shared across invocations via `Arc<AppState>`.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub config: RuntimeConfig,
    pub fetch_params: FetchParams,

    // ── Sources ─────────────────────────────────────────────────────────
    pub registry: SourceRegistry,

    // ── Caches ──────────────────────────────────────────────────────────
    pub funding_cache: TtlCache<FundingSnapshot>,
    pub calendar_cache: TtlCache<Vec<ScheduledEvent>>,

    // ── Alerting ────────────────────────────────────────────────────────
    pub alert_seen: AlertSeenSet,
    catalog: Arc<dyn EventCatalog>,
    sink: Option<Arc<dyn NotificationSink>>,

    // ── Counters ────────────────────────────────────────────────────────
    /// Fetch cycles actually run (cache misses and forced refreshes).
    pub fetch_cycles: AtomicU64,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        registry: SourceRegistry,
        catalog: Arc<dyn EventCatalog>,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        let fetch_params = FetchParams::from_config(&config);
        let funding_cache = TtlCache::new("funding", Duration::from_secs(config.funding_cache_ttl_secs));
        let calendar_cache = TtlCache::new("calendar", Duration::from_secs(config.calendar_cache_ttl_secs));

        info!(
            sources = registry.len(),
            sink = sink.is_some(),
            funding_ttl_secs = config.funding_cache_ttl_secs,
            calendar_ttl_secs = config.calendar_cache_ttl_secs,
            "app state initialised"
        );

        Self {
            config,
            fetch_params,
            registry,
            funding_cache,
            calendar_cache,
            alert_seen: AlertSeenSet::new(),
            catalog,
            sink,
            fetch_cycles: AtomicU64::new(0),
        }
    }

    /// The notification sink, if one was configured.
    pub fn sink(&self) -> Option<&Arc<dyn NotificationSink>> {
        self.sink.as_ref()
    }

    // =========================================================================
    // Funding
    // =========================================================================

    /// Current funding snapshot.  Served from the cache unless stale or
    /// `force_refresh` is set.
    pub async fn funding_snapshot(&self, force_refresh: bool) -> FundingSnapshot {
        self.funding_snapshot_at(force_refresh, Utc::now()).await
    }

    /// Same as [`funding_snapshot`](Self::funding_snapshot), with the cycle's
    /// settlement window anchored at `now`.
    pub async fn funding_snapshot_at(&self, force_refresh: bool, now: DateTime<Utc>) -> FundingSnapshot {
        let registry = &self.registry;
        let params = &self.fetch_params;
        let cycles = &self.fetch_cycles;

        self.funding_cache
            .get_or_try_refresh(force_refresh, move || async move {
                cycles.fetch_add(1, Ordering::Relaxed);
                let result = run_fetch_cycle_at(registry, params, now.timestamp_millis()).await;
                Ok::<_, Infallible>(build_snapshot(result, now))
            })
            .await
            .unwrap_or_else(|never| match never {})
    }

    // =========================================================================
    // Calendar
    // =========================================================================

    /// The event catalog restricted to the configured origin country and
    /// sorted by schedule time.  Catalog failures are returned to the caller
    /// and leave any cached copy untouched.
    pub async fn calendar_events(&self) -> Result<Vec<ScheduledEvent>, CatalogError> {
        let catalog = Arc::clone(&self.catalog);
        let country = self.config.alert_country.clone();

        self.calendar_cache
            .get_or_try_refresh(false, move || async move {
                let mut events = catalog.fetch_events().await?;
                if let Some(country) = &country {
                    events.retain(|e| e.origin_country.eq_ignore_ascii_case(country));
                }
                events.sort_by_key(|e| e.scheduled_at);
                debug!(count = events.len(), "calendar snapshot refreshed");
                Ok::<_, CatalogError>(events)
            })
            .await
    }

    /// Event filter for `severity` using the configured country and the
    /// reference timezone.
    pub fn event_filter(&self, severity: SeverityFilter, reference_offset: FixedOffset) -> EventFilter {
        EventFilter {
            severity,
            country: self.config.alert_country.clone(),
            reference_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::alerts::ImpactLevel;
    use crate::error::SourceError;
    use crate::sources::{BulkSource, RegisteredSource};
    use crate::types::FundingRecord;

    struct FixedBulk {
        settle: i64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BulkSource for FixedBulk {
        async fn list_funding_rates(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let record = FundingRecord {
                funding_rate: Some(0.001),
                next_funding_timestamp: Some(self.settle),
                ..Default::default()
            };
            Ok(BTreeMap::from([("BTC/USDT:USDT".to_string(), record)]))
        }
    }

    struct FakeCatalog {
        events: Vec<ScheduledEvent>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventCatalog for FakeCatalog {
        async fn fetch_events(&self) -> Result<Vec<ScheduledEvent>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CatalogError::Status(503));
            }
            Ok(self.events.clone())
        }
    }

    fn event(title: &str, country: &str, hour: u32) -> ScheduledEvent {
        let offset = FixedOffset::west_opt(4 * 3600).unwrap();
        ScheduledEvent {
            title: title.to_string(),
            origin_country: country.to_string(),
            impact_level: ImpactLevel::High,
            scheduled_at: offset.with_ymd_and_hms(2024, 3, 12, hour, 30, 0).unwrap(),
            forecast: None,
            previous: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn state_with(bulk: Arc<FixedBulk>, catalog: Arc<FakeCatalog>) -> AppState {
        let registry = SourceRegistry::new([RegisteredSource::bulk("binance", "Binance", bulk)]);
        AppState::new(RuntimeConfig::default(), registry, catalog, None)
    }

    fn catalog(events: Vec<ScheduledEvent>, fail: bool) -> Arc<FakeCatalog> {
        Arc::new(FakeCatalog {
            events,
            fail,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn funding_snapshot_is_cached_until_forced() {
        let bulk = Arc::new(FixedBulk {
            settle: now().timestamp_millis() + 10 * 60_000,
            calls: AtomicUsize::new(0),
        });
        let state = state_with(Arc::clone(&bulk), catalog(vec![], false));

        let first = state.funding_snapshot_at(false, now()).await;
        assert_eq!(first.total_instruments, 1);
        assert_eq!(first.total_sources, 1);
        assert!(first.errors.is_empty());

        let second = state.funding_snapshot_at(false, now()).await;
        assert_eq!(second, first);
        assert_eq!(bulk.calls.load(Ordering::SeqCst), 1);

        state.funding_snapshot_at(true, now()).await;
        assert_eq!(bulk.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.fetch_cycles.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn calendar_is_filtered_sorted_and_cached() {
        let events = vec![
            event("Retail Sales m/m", "USD", 10),
            event("ECB Press Conference", "EUR", 9),
            event("CPI m/m", "USD", 8),
        ];
        let cat = catalog(events, false);
        let bulk = Arc::new(FixedBulk {
            settle: 0,
            calls: AtomicUsize::new(0),
        });
        let state = state_with(bulk, Arc::clone(&cat));

        let titles: Vec<String> = state
            .calendar_events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["CPI m/m", "Retail Sales m/m"]);

        state.calendar_events().await.unwrap();
        assert_eq!(cat.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn calendar_failure_reaches_caller() {
        let bulk = Arc::new(FixedBulk {
            settle: 0,
            calls: AtomicUsize::new(0),
        });
        let state = state_with(bulk, catalog(vec![], true));

        let err = state.calendar_events().await.unwrap_err();
        assert!(matches!(err, CatalogError::Status(503)));
        assert!(state.calendar_cache.get().is_none());
    }
}
