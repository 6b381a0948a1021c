// =============================================================================
// Alert Gate — time-window + dedup decision for advance event alerts
// =============================================================================
//
// Level-triggered: an event fires when it is between `lower` and `upper`
// minutes away (lower exclusive, upper inclusive) and its identity key has
// not been seen.  Safe to call at any cadence; the seen-set alone provides
// idempotence.  With the default 15/35 bounds every event has a 20 minute
// firing window.
//
// The admission check is separate: it decides whether any alerting work
// should run at all, based on a quiet window in the reference timezone that
// may wrap past midnight.
// =============================================================================

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::calendar::{ImpactLevel, ScheduledEvent};

/// Which impact levels are eligible for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeverityFilter {
    #[default]
    HighOnly,
    HighAndMedium,
}

impl SeverityFilter {
    pub fn admits(self, impact: ImpactLevel) -> bool {
        match self {
            Self::HighOnly => impact == ImpactLevel::High,
            Self::HighAndMedium => matches!(impact, ImpactLevel::High | ImpactLevel::Medium),
        }
    }
}

/// Firing window in minutes before the event: `(lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertWindow {
    pub lower_minutes: f64,
    pub upper_minutes: f64,
}

impl Default for AlertWindow {
    fn default() -> Self {
        Self {
            lower_minutes: 15.0,
            upper_minutes: 35.0,
        }
    }
}

impl AlertWindow {
    pub fn contains(&self, minutes_until: f64) -> bool {
        minutes_until > self.lower_minutes && minutes_until <= self.upper_minutes
    }
}

/// Which events are considered at all.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub severity: SeverityFilter,
    /// Restrict to one origin country; `None` admits every country.
    pub country: Option<String>,
    /// Reference timezone defining "today".
    pub reference_offset: FixedOffset,
}

impl EventFilter {
    /// `true` if `event` passes the severity and country filters and is
    /// scheduled on the same reference-timezone date as `now`.
    pub fn admits(&self, event: &ScheduledEvent, now: DateTime<Utc>) -> bool {
        if !self.severity.admits(event.impact_level) {
            return false;
        }
        if let Some(country) = &self.country {
            if !event.origin_country.eq_ignore_ascii_case(country) {
                return false;
            }
        }
        let today = now.with_timezone(&self.reference_offset).date_naive();
        event.scheduled_at.with_timezone(&self.reference_offset).date_naive() == today
    }
}

/// Identity keys of events already alerted in this process.
///
/// Grows monotonically and is not persisted; a restart may alert an event a
/// second time.
#[derive(Debug, Default)]
pub struct AlertSeenSet {
    keys: Mutex<HashSet<String>>,
}

impl AlertSeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key`; returns `true` if it was not present.  Check and insert
    /// happen under one lock.
    pub fn mark_if_new(&self, key: String) -> bool {
        self.keys.lock().insert(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

/// Events due for an advance alert at `now`.  Every returned event's key is
/// added to `seen`, so it is never returned again by this process.
pub fn evaluate_alerts(
    now: DateTime<Utc>,
    catalog: &[ScheduledEvent],
    window: &AlertWindow,
    filter: &EventFilter,
    seen: &AlertSeenSet,
) -> Vec<ScheduledEvent> {
    let now_ms = now.timestamp_millis();
    let mut due = Vec::new();

    for event in catalog {
        if !filter.admits(event, now) {
            continue;
        }
        let minutes_until = (event.scheduled_at_ms() - now_ms) as f64 / 60_000.0;
        if !window.contains(minutes_until) {
            continue;
        }
        if seen.mark_if_new(event.identity_key()) {
            debug!(title = %event.title, minutes_until, "event alert due");
            due.push(event.clone());
        }
    }

    if !due.is_empty() {
        info!(count = due.len(), "advance alerts selected");
    }
    due
}

/// Today's events (reference timezone) that pass `filter`, in schedule order.
pub fn todays_events(
    now: DateTime<Utc>,
    catalog: &[ScheduledEvent],
    filter: &EventFilter,
) -> Vec<ScheduledEvent> {
    let mut events: Vec<ScheduledEvent> = catalog
        .iter()
        .filter(|e| filter.admits(e, now))
        .cloned()
        .collect();
    events.sort_by_key(|e| e.scheduled_at);
    events
}

/// Time-of-day range during which no alerting work is admitted.
/// `start` is inclusive, `end` exclusive; `start > end` wraps past midnight
/// and `start == end` is an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// `true` unless `now` (in the reference timezone) falls inside `quiet`.
pub fn is_admitted(now: DateTime<Utc>, quiet: &QuietWindow, reference_offset: FixedOffset) -> bool {
    let local = now.with_timezone(&reference_offset).time();
    !quiet.contains(local)
}
