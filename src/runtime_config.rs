// =============================================================================
// Runtime Configuration — tunables for fetching, caching and alert gating
// =============================================================================
//
// Loaded once at startup from a JSON file.  All fields carry
// `#[serde(default)]` so that a partial (or empty) file still loads, and
// adding new fields never breaks an older config file.  A handful of
// settings can be overridden from the environment.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alerts::gate::{AlertWindow, QuietWindow, SeverityFilter};
use crate::error::ConfigurationError;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_significance_threshold() -> f64 {
    0.0005
}

fn default_lookahead_window_ms() -> i64 {
    3_600_000
}

fn default_source_timeout_secs() -> u64 {
    45
}

fn default_targeted_concurrency() -> usize {
    10
}

fn default_funding_cache_ttl_secs() -> u64 {
    60
}

fn default_calendar_cache_ttl_secs() -> u64 {
    300
}

fn default_alert_lower_minutes() -> f64 {
    15.0
}

fn default_alert_upper_minutes() -> f64 {
    35.0
}

fn default_alert_country() -> Option<String> {
    Some("USD".to_string())
}

fn default_reference_utc_offset_hours() -> i32 {
    8
}

fn default_quiet_start() -> String {
    "02:00".to_string()
}

fn default_quiet_end() -> String {
    "06:00".to_string()
}

fn default_hourly_push_start_minute() -> u32 {
    50
}

fn default_hourly_push_end_minute() -> u32 {
    2
}

fn default_digest_hours() -> Vec<u32> {
    vec![19, 21]
}

fn default_top_instruments() -> usize {
    3
}

fn default_invocation_interval_secs() -> u64 {
    300
}

fn default_invocation_budget_secs() -> u64 {
    60
}

fn default_calendar_url() -> String {
    "https://nfs.faireconomy.media/ff_calendar_thisweek.json".to_string()
}

fn default_enabled_sources() -> Vec<String> {
    vec!["binance".to_string(), "bybit".to_string(), "okx".to_string()]
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Funding aggregation ------------------------------------------------

    /// Minimum absolute funding rate for an instrument to be reported.
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,

    /// Settlement must fall within `(now, now + lookahead]`.
    #[serde(default = "default_lookahead_window_ms")]
    pub lookahead_window_ms: i64,

    /// Per-source timeout for each fetch phase.  Capped at a third of
    /// `invocation_budget_secs` when the fetch parameters are derived.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,

    /// In-flight request cap per targeted source.
    #[serde(default = "default_targeted_concurrency")]
    pub targeted_concurrency: usize,

    /// Source ids to register, in query order.
    #[serde(default = "default_enabled_sources")]
    pub enabled_sources: Vec<String>,

    // --- Caching ------------------------------------------------------------

    #[serde(default = "default_funding_cache_ttl_secs")]
    pub funding_cache_ttl_secs: u64,

    #[serde(default = "default_calendar_cache_ttl_secs")]
    pub calendar_cache_ttl_secs: u64,

    #[serde(default = "default_calendar_url")]
    pub calendar_url: String,

    // --- Alert gating -------------------------------------------------------

    /// Events closer than this many minutes are no longer alerted.
    #[serde(default = "default_alert_lower_minutes")]
    pub alert_lower_minutes: f64,

    /// Events further away than this many minutes are not alerted yet.
    #[serde(default = "default_alert_upper_minutes")]
    pub alert_upper_minutes: f64,

    #[serde(default)]
    pub alert_severity: SeverityFilter,

    /// Only events from this origin country are considered (None = all).
    #[serde(default = "default_alert_country")]
    pub alert_country: Option<String>,

    /// Fixed offset of the reference timezone used for "today", the quiet
    /// window and the push schedule.
    #[serde(default = "default_reference_utc_offset_hours")]
    pub reference_utc_offset_hours: i32,

    /// Start of the overnight quiet window, "HH:MM" in reference time.
    #[serde(default = "default_quiet_start")]
    pub quiet_start: String,

    /// End (exclusive) of the quiet window, "HH:MM" in reference time.
    #[serde(default = "default_quiet_end")]
    pub quiet_end: String,

    // --- Push schedule ------------------------------------------------------

    /// First minute of the hour (inclusive) at which the funding push runs.
    #[serde(default = "default_hourly_push_start_minute")]
    pub hourly_push_start_minute: u32,

    /// Last minute of the hour (inclusive); may wrap past :59.
    #[serde(default = "default_hourly_push_end_minute")]
    pub hourly_push_end_minute: u32,

    /// Hours (reference time) at which the daily event digest is pushed.
    #[serde(default = "default_digest_hours")]
    pub digest_hours: Vec<u32>,

    #[serde(default = "default_top_instruments")]
    pub top_instruments: usize,

    // --- Host trigger -------------------------------------------------------

    #[serde(default = "default_invocation_interval_secs")]
    pub invocation_interval_secs: u64,

    /// Wall-clock budget for a single invocation.
    #[serde(default = "default_invocation_budget_secs")]
    pub invocation_budget_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            significance_threshold: default_significance_threshold(),
            lookahead_window_ms: default_lookahead_window_ms(),
            source_timeout_secs: default_source_timeout_secs(),
            targeted_concurrency: default_targeted_concurrency(),
            enabled_sources: default_enabled_sources(),
            funding_cache_ttl_secs: default_funding_cache_ttl_secs(),
            calendar_cache_ttl_secs: default_calendar_cache_ttl_secs(),
            calendar_url: default_calendar_url(),
            alert_lower_minutes: default_alert_lower_minutes(),
            alert_upper_minutes: default_alert_upper_minutes(),
            alert_severity: SeverityFilter::default(),
            alert_country: default_alert_country(),
            reference_utc_offset_hours: default_reference_utc_offset_hours(),
            quiet_start: default_quiet_start(),
            quiet_end: default_quiet_end(),
            hourly_push_start_minute: default_hourly_push_start_minute(),
            hourly_push_end_minute: default_hourly_push_end_minute(),
            digest_hours: default_digest_hours(),
            top_instruments: default_top_instruments(),
            invocation_interval_secs: default_invocation_interval_secs(),
            invocation_budget_secs: default_invocation_budget_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            sources = ?config.enabled_sources,
            threshold = config.significance_threshold,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `SENTINEL_SOURCES` (comma-separated source ids) if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(list) = std::env::var("SENTINEL_SOURCES") {
            self.enabled_sources = parse_source_list(&list);
        }
    }

    /// The fixed reference timezone.
    pub fn reference_offset(&self) -> Result<FixedOffset, ConfigurationError> {
        self.reference_utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigurationError::Invalid {
                name: "reference_utc_offset_hours",
                reason: format!("{} is not a valid UTC offset", self.reference_utc_offset_hours),
            })
    }

    pub fn quiet_window(&self) -> Result<QuietWindow, ConfigurationError> {
        let start = parse_clock("quiet_start", &self.quiet_start)?;
        let end = parse_clock("quiet_end", &self.quiet_end)?;
        Ok(QuietWindow::new(start, end))
    }

    pub fn alert_window(&self) -> Result<AlertWindow, ConfigurationError> {
        if self.alert_lower_minutes >= self.alert_upper_minutes {
            return Err(ConfigurationError::Invalid {
                name: "alert_lower_minutes",
                reason: format!(
                    "lower bound {} must be below upper bound {}",
                    self.alert_lower_minutes, self.alert_upper_minutes
                ),
            });
        }
        Ok(AlertWindow {
            lower_minutes: self.alert_lower_minutes,
            upper_minutes: self.alert_upper_minutes,
        })
    }
}

fn parse_source_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_clock(name: &'static str, value: &str) -> Result<NaiveTime, ConfigurationError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| ConfigurationError::Invalid {
        name,
        reason: format!("{value:?}: {e}"),
    })
}
