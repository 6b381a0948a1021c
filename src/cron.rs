// =============================================================================
// Host Invocation — one scheduled run of the sentinel
// =============================================================================
//
// Called by an outside trigger (the binary's interval loop, a cron job, ...).
// Each invocation, in order:
//
//   1. refuses to run without a notification sink
//   2. skips entirely inside the quiet window (reference timezone)
//   3. pushes advance alerts for events about to happen
//   4. inside the hourly push window: pushes the top funding instruments
//   5. at a digest hour (and inside the push window): pushes today's events
//
// Push failures are logged and recorded in the report; nothing is retried.
// Calendar failures mean "no alerts/digest this time", never an error.
// =============================================================================

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::{
    evaluate_alerts, is_admitted, todays_events, AlertWindow, ImpactLevel, NotificationSink,
    ScheduledEvent, SeverityFilter,
};
use crate::app_state::AppState;
use crate::error::ConfigurationError;
use crate::types::FundingSnapshot;

/// What one invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvocationReport {
    pub skipped: bool,
    pub reason: Option<String>,
    /// One entry per attempted push, e.g. "funding: delivered (200)".
    pub actions: Vec<String>,
}

impl InvocationReport {
    fn skipped(reason: String) -> Self {
        Self {
            skipped: true,
            reason: Some(reason),
            actions: Vec::new(),
        }
    }
}

/// Run one invocation at `now`.
pub async fn run_invocation(state: &AppState, now: DateTime<Utc>) -> Result<InvocationReport, ConfigurationError> {
    let sink = state
        .sink()
        .ok_or(ConfigurationError::Missing("SC_SENDKEY"))?
        .as_ref();
    let offset = state.config.reference_offset()?;
    let quiet = state.config.quiet_window()?;
    let window = state.config.alert_window()?;

    let local = now.with_timezone(&offset);
    info!(local_time = %local.format("%H:%M"), "invocation started");

    if !is_admitted(now, &quiet, offset) {
        info!(local_time = %local.format("%H:%M"), "inside quiet window, skipping");
        return Ok(InvocationReport::skipped(format!(
            "local time {} is inside quiet window {}-{}",
            local.format("%H:%M"),
            state.config.quiet_start,
            state.config.quiet_end
        )));
    }

    let mut report = InvocationReport::default();

    // ── Advance alerts ──────────────────────────────────────────────────
    match state.calendar_events().await {
        Ok(catalog) => {
            let filter = state.event_filter(state.config.alert_severity, offset);
            let due = evaluate_alerts(now, &catalog, &window, &filter, &state.alert_seen);
            if due.is_empty() {
                debug!("no advance alerts due");
            } else {
                let title = alert_title(&window);
                let body = format_events(&due, offset);
                deliver(sink, "event_alert", &title, &body, &mut report).await;
            }
        }
        Err(e) => warn!(error = %e, "calendar unavailable, no alerts this invocation"),
    }

    // ── Hourly funding push ─────────────────────────────────────────────
    let minute = local.minute();
    if !in_minute_window(
        minute,
        state.config.hourly_push_start_minute,
        state.config.hourly_push_end_minute,
    ) {
        debug!(minute, "outside hourly push window");
        return Ok(report);
    }

    let snapshot = state.funding_snapshot_at(false, now).await;
    match format_funding(&snapshot, state.config.top_instruments) {
        Some(body) => {
            let title = format!(
                "{} funding rate top {}",
                local.format("%H:%M"),
                state.config.top_instruments
            );
            deliver(sink, "funding", &title, &body, &mut report).await;
        }
        None => debug!(errors = snapshot.errors.len(), "no funding data to push"),
    }

    // ── Evening digest ──────────────────────────────────────────────────
    if state.config.digest_hours.contains(&local.hour()) {
        match state.calendar_events().await {
            Ok(catalog) => {
                let filter = state.event_filter(SeverityFilter::HighAndMedium, offset);
                let events = todays_events(now, &catalog, &filter);
                if events.is_empty() {
                    debug!("no events today, digest skipped");
                } else {
                    let title = format!("{} economic calendar today", local.format("%H:%M"));
                    let body = format_events(&events, offset);
                    deliver(sink, "calendar", &title, &body, &mut report).await;
                }
            }
            Err(e) => warn!(error = %e, "calendar unavailable, digest skipped"),
        }
    }

    info!(pushes = report.actions.len(), "invocation finished");
    Ok(report)
}

/// Inclusive minute-of-hour window; `start > end` wraps past :59.
pub fn in_minute_window(minute: u32, start: u32, end: u32) -> bool {
    if start <= end {
        minute >= start && minute <= end
    } else {
        minute >= start || minute <= end
    }
}

async fn deliver(
    sink: &dyn NotificationSink,
    action: &str,
    title: &str,
    body: &str,
    report: &mut InvocationReport,
) {
    match sink.send(title, body).await {
        Ok(receipt) => {
            info!(action, status = receipt.status, "push delivered");
            report.actions.push(format!("{action}: delivered ({})", receipt.status));
        }
        Err(e) => {
            warn!(action, error = %e, "push failed");
            report.actions.push(format!("{action}: failed ({e})"));
        }
    }
}

// =============================================================================
// Message formatting
// =============================================================================

fn alert_title(window: &AlertWindow) -> String {
    format!("Economic event alert (in {:.0} min)", window.upper_minutes)
}

fn format_rate(rate: f64) -> String {
    let sign = if rate > 0.0 { "+" } else { "" };
    format!("{sign}{:.4}%", rate * 100.0)
}

/// Markdown body listing the top `limit` instruments with every source's
/// rate, plus a partial-failure note.  `None` when there is nothing to show.
fn format_funding(snapshot: &FundingSnapshot, limit: usize) -> Option<String> {
    if snapshot.groups.is_empty() {
        return None;
    }

    let mut body = String::new();
    for group in snapshot.groups.iter().take(limit) {
        let lead = group.observations.first().map(|o| o.funding_rate).unwrap_or_default();
        body.push_str(&format!("### {} {}\n\n", group.instrument_symbol, format_rate(lead)));
        for obs in &group.observations {
            body.push_str(&format!("- **{}** {}\n", obs.source_name, format_rate(obs.funding_rate)));
        }
        body.push('\n');
    }

    if !snapshot.errors.is_empty() {
        body.push_str(&format!("> Partial failure: {}\n\n", snapshot.errors.join(", ")));
    }
    Some(body)
}

fn format_events(events: &[ScheduledEvent], offset: FixedOffset) -> String {
    let mut body = String::new();
    for event in events {
        let marker = if event.impact_level == ImpactLevel::High { "🔴" } else { "🟡" };
        let time = event.scheduled_at.with_timezone(&offset).format("%H:%M");
        body.push_str(&format!("{marker} **{time}** {}", event.title));
        if let Some(forecast) = &event.forecast {
            body.push_str(&format!(" (forecast: {forecast})"));
        }
        if let Some(previous) = &event.previous {
            body.push_str(&format!(" (previous: {previous})"));
        }
        body.push_str("\n\n");
    }
    body
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    use super::*;
    use crate::alerts::{DeliveryReceipt, EventCatalog};
    use crate::error::{CatalogError, NotifyError, SourceError};
    use crate::runtime_config::RuntimeConfig;
    use crate::sources::{BulkSource, RegisteredSource, SourceRegistry};
    use crate::types::FundingRecord;

    struct RatesFrom {
        rates: Vec<(&'static str, f64, i64)>,
    }

    #[async_trait]
    impl BulkSource for RatesFrom {
        async fn list_funding_rates(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError> {
            Ok(self
                .rates
                .iter()
                .map(|(pair, rate, settle)| {
                    let record = FundingRecord {
                        funding_rate: Some(*rate),
                        next_funding_timestamp: Some(*settle),
                        ..Default::default()
                    };
                    (pair.to_string(), record)
                })
                .collect())
        }
    }

    struct Down;

    #[async_trait]
    impl BulkSource for Down {
        async fn list_funding_rates(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError> {
            Err(SourceError::Upstream("HTTP 502".to_string()))
        }
    }

    struct Catalog(Option<Vec<ScheduledEvent>>);

    #[async_trait]
    impl EventCatalog for Catalog {
        async fn fetch_events(&self) -> Result<Vec<ScheduledEvent>, CatalogError> {
            self.0.clone().ok_or(CatalogError::Fetch("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        reject: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, title: &str, body: &str) -> Result<DeliveryReceipt, NotifyError> {
            self.sent.lock().push((title.to_string(), body.to_string()));
            if self.reject {
                return Err(NotifyError::Rejected {
                    status: 400,
                    body: "bad key".to_string(),
                });
            }
            Ok(DeliveryReceipt {
                status: 200,
                body: "{\"code\":0}".to_string(),
            })
        }
    }

    /// 2024-03-01 19:55 in UTC+8.
    fn evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 11, 55, 0).unwrap()
    }

    fn at(now: DateTime<Utc>, minutes: i64) -> DateTime<FixedOffset> {
        (now + chrono::Duration::minutes(minutes)).fixed_offset()
    }

    fn event(title: &str, impact: ImpactLevel, scheduled_at: DateTime<FixedOffset>) -> ScheduledEvent {
        ScheduledEvent {
            title: title.to_string(),
            origin_country: "USD".to_string(),
            impact_level: impact,
            scheduled_at,
            forecast: Some("0.3%".to_string()),
            previous: None,
        }
    }

    fn default_events(now: DateTime<Utc>) -> Vec<ScheduledEvent> {
        vec![
            event("CPI m/m", ImpactLevel::High, at(now, 25)),
            event("Consumer Sentiment", ImpactLevel::Medium, at(now, 95)),
        ]
    }

    fn default_sources(now: DateTime<Utc>) -> Vec<RegisteredSource> {
        let settle = now.timestamp_millis() + 5 * 60_000;
        vec![
            RegisteredSource::bulk(
                "binance",
                "Binance",
                Arc::new(RatesFrom {
                    rates: vec![
                        ("BTC/USDT:USDT", 0.0009, settle),
                        ("ETH/USDT:USDT", -0.0012, settle),
                        ("SOL/USDT:USDT", 0.0001, settle),
                    ],
                }),
            ),
            RegisteredSource::bulk("bybit", "Bybit", Arc::new(Down)),
        ]
    }

    fn state(
        sources: Vec<RegisteredSource>,
        events: Option<Vec<ScheduledEvent>>,
        sink: Option<Arc<RecordingSink>>,
    ) -> AppState {
        AppState::new(
            RuntimeConfig::default(),
            SourceRegistry::new(sources),
            Arc::new(Catalog(events)),
            sink.map(|s| s as Arc<dyn NotificationSink>),
        )
    }

    #[test]
    fn minute_window_wraps() {
        assert!(in_minute_window(50, 50, 2));
        assert!(in_minute_window(59, 50, 2));
        assert!(in_minute_window(0, 50, 2));
        assert!(in_minute_window(2, 50, 2));
        assert!(!in_minute_window(3, 50, 2));
        assert!(!in_minute_window(49, 50, 2));
        assert!(in_minute_window(10, 10, 20));
        assert!(!in_minute_window(21, 10, 20));
    }

    #[test]
    fn rates_are_signed_percentages() {
        assert_eq!(format_rate(0.0008), "+0.0800%");
        assert_eq!(format_rate(-0.0012), "-0.1200%");
        assert_eq!(format_rate(0.0), "0.0000%");
    }

    #[tokio::test]
    async fn refuses_without_sink() {
        let now = evening();
        let state = state(default_sources(now), Some(default_events(now)), None);
        let err = run_invocation(&state, now).await.unwrap_err();
        assert_eq!(err, ConfigurationError::Missing("SC_SENDKEY"));
    }

    #[tokio::test]
    async fn quiet_window_skips_everything() {
        // 03:00 in UTC+8.
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 19, 0, 0).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let state = state(default_sources(now), Some(default_events(now)), Some(Arc::clone(&sink)));

        let report = run_invocation(&state, now).await.unwrap();
        assert!(report.skipped);
        assert!(report.reason.unwrap().contains("03:00"));
        assert!(sink.sent.lock().is_empty());
        assert!(state.alert_seen.is_empty());
    }

    #[tokio::test]
    async fn evening_invocation_pushes_alert_funding_and_digest() {
        let now = evening();
        let sink = Arc::new(RecordingSink::default());
        let state = state(default_sources(now), Some(default_events(now)), Some(Arc::clone(&sink)));

        let report = run_invocation(&state, now).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(
            report.actions,
            vec![
                "event_alert: delivered (200)",
                "funding: delivered (200)",
                "calendar: delivered (200)",
            ]
        );

        let sent = sink.sent.lock();
        assert_eq!(sent[0].0, "Economic event alert (in 35 min)");
        assert_eq!(sent[0].1, "🔴 **20:20** CPI m/m (forecast: 0.3%)\n\n");

        assert_eq!(sent[1].0, "19:55 funding rate top 3");
        let funding = &sent[1].1;
        assert!(funding.starts_with("### ETH -0.1200%\n\n- **Binance** -0.1200%\n"));
        assert!(funding.contains("### BTC +0.0900%"));
        assert!(!funding.contains("SOL"));
        assert!(funding.contains("> Partial failure: Bybit: HTTP 502"));

        assert_eq!(sent[2].0, "19:55 economic calendar today");
        assert!(sent[2].1.contains("CPI m/m"));
        assert!(sent[2].1.contains("🟡 **21:30** Consumer Sentiment"));
    }

    #[tokio::test]
    async fn alerts_fire_once_across_invocations() {
        // 19:30 in UTC+8: outside the hourly push window.
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 11, 30, 0).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let events = vec![event("CPI m/m", ImpactLevel::High, at(now, 20))];
        let state = state(default_sources(now), Some(events), Some(Arc::clone(&sink)));

        let first = run_invocation(&state, now).await.unwrap();
        assert_eq!(first.actions, vec!["event_alert: delivered (200)"]);

        let later = now + chrono::Duration::minutes(1);
        let second = run_invocation(&state, later).await.unwrap();
        assert!(second.actions.is_empty());
        assert_eq!(sink.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn calendar_outage_still_pushes_funding() {
        // 14:55 in UTC+8: push window, not a digest hour.
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 6, 55, 0).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let state = state(default_sources(now), None, Some(Arc::clone(&sink)));

        let report = run_invocation(&state, now).await.unwrap();
        assert_eq!(report.actions, vec!["funding: delivered (200)"]);
    }

    #[tokio::test]
    async fn push_failures_are_recorded_not_retried() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 6, 55, 0).unwrap();
        let sink = Arc::new(RecordingSink {
            reject: true,
            ..Default::default()
        });
        let state = state(default_sources(now), Some(vec![]), Some(Arc::clone(&sink)));

        let report = run_invocation(&state, now).await.unwrap();
        assert_eq!(report.actions.len(), 1);
        assert!(report.actions[0].starts_with("funding: failed (push endpoint returned HTTP 400"));
        assert_eq!(sink.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn nothing_significant_means_no_funding_push() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 6, 55, 0).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let settle = now.timestamp_millis() + 5 * 60_000;
        let sources = vec![RegisteredSource::bulk(
            "binance",
            "Binance",
            Arc::new(RatesFrom {
                rates: vec![("BTC/USDT:USDT", 0.0001, settle)],
            }),
        )];
        let state = state(sources, Some(vec![]), Some(Arc::clone(&sink)));

        let report = run_invocation(&state, now).await.unwrap();
        assert!(report.actions.is_empty());
        assert!(sink.sent.lock().is_empty());
    }
}
