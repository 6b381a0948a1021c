// =============================================================================
// Funding Sentinel — Main Entry Point
// =============================================================================
//
// Owns the periodic trigger.  Every `invocation_interval_secs` it runs one
// invocation under a wall-clock budget; an invocation that overruns is
// abandoned and the next tick starts fresh.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use funding_sentinel::alerts::{NotificationSink, ServerChanSink, WeeklyCalendarClient};
use funding_sentinel::exchanges::build_registry;
use funding_sentinel::{run_invocation, AppState, RuntimeConfig};

const DEFAULT_CONFIG_PATH: &str = "sentinel_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Funding Sentinel starting up");

    let config_path =
        std::env::var("SENTINEL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    // Fail fast on settings every invocation depends on.
    config.reference_offset()?;
    config.quiet_window()?;
    config.alert_window()?;

    // ── 2. Collaborators ─────────────────────────────────────────────────
    let registry = build_registry(&config.enabled_sources)?;
    if registry.is_empty() {
        warn!(sources = ?config.enabled_sources, "no usable sources enabled");
    }

    let catalog = WeeklyCalendarClient::new(config.calendar_url.clone())
        .context("failed to build calendar client")?;

    let sink: Option<Arc<dyn NotificationSink>> = match ServerChanSink::from_env() {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            error!(error = %e, "notification sink unavailable, invocations will be refused");
            None
        }
    };

    let interval_secs = config.invocation_interval_secs.max(1);
    let budget = Duration::from_secs(config.invocation_budget_secs.max(1));
    let state = Arc::new(AppState::new(config, registry, Arc::new(catalog), sink));

    // ── 3. Invocation loop ───────────────────────────────────────────────
    let loop_state = state.clone();
    let trigger = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            match tokio::time::timeout(budget, run_invocation(&loop_state, Utc::now())).await {
                Ok(Ok(report)) if report.skipped => {
                    info!(reason = ?report.reason, "invocation skipped");
                }
                Ok(Ok(report)) => {
                    info!(actions = ?report.actions, "invocation complete");
                }
                Ok(Err(e)) => error!(error = %e, "invocation refused"),
                Err(_) => warn!(budget_secs = budget.as_secs(), "invocation exceeded its budget"),
            }
        }
    });

    info!(interval_secs, "Sentinel running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");
    trigger.abort();

    info!(alerted_events = state.alert_seen.len(), "Funding Sentinel shut down complete.");
    Ok(())
}
