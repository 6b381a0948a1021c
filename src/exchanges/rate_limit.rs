// =============================================================================
// Request-Weight Tracker — keeps Binance futures usage below the 429 line
// =============================================================================
//
// Binance USDⓈ-M enforces 2400 request weight per minute per IP; we hard-cap
// ourselves at 2000.  The tracker reads `X-MBX-USED-WEIGHT-1M` after every
// response and keeps an atomic counter any task may query lock-free.
//
// A refused request never sees a response, so the reported weight expires
// on its own once the one-minute window it describes has passed.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 2000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 1600;

const USED_WEIGHT_HEADER: &str = "X-MBX-USED-WEIGHT-1M";
/// Length of the window the header reports on.
const WEIGHT_WINDOW: Duration = Duration::from_secs(60);

/// Thread-safe request-weight tracker backed by an atomic counter.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    updated_at: Mutex<Option<Instant>>,
}

/// Immutable snapshot of the tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub hard_limit: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            updated_at: Mutex::new(None),
        }
    }

    /// Update the counter from the response headers returned by Binance.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(weight) = headers
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };

        let prev = self.current_weight();
        self.used_weight_1m.store(weight, Ordering::Relaxed);
        *self.updated_at.lock() = Some(Instant::now());
        if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = weight, "request weight updated from header");
    }

    /// Return `true` if we can afford to spend `weight` more request weight
    /// without exceeding the hard limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.current_weight();
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked, would exceed weight limit"
            );
        }
        allowed
    }

    /// Last reported weight, or 0 once its window has elapsed.
    fn current_weight(&self) -> u32 {
        let updated_at = *self.updated_at.lock();
        if updated_at.is_some_and(|at| at.elapsed() <= WEIGHT_WINDOW) {
            self.used_weight_1m.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.current_weight(),
            hard_limit: WEIGHT_HARD_LIMIT,
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.current_weight())
            .finish()
    }
}
