// =============================================================================
// Result Cache — single-slot, short-TTL memory cache
// =============================================================================
//
// One entry per cache instance.  Staleness is checked lazily on read; a stale
// entry is ignored and later overwritten, never actively evicted.
//
// Thread safety:
//   - parking_lot::Mutex around the slot for plain get/set.
//   - tokio::sync::Mutex single-flight guard so concurrent refreshers do not
//     all hit upstream; the second one re-checks the slot after the first
//     has filled it.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry<T> {
    payload: T,
    created_at: Instant,
}

/// Single-slot TTL cache.
pub struct TtlCache<T> {
    name: &'static str,
    ttl: Duration,
    slot: Mutex<Option<CacheEntry<T>>>,
    refresh_guard: tokio::sync::Mutex<()>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            slot: Mutex::new(None),
            refresh_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached payload, or `None` if never set or older than the TTL.
    pub fn get(&self) -> Option<T> {
        self.get_at(Instant::now())
    }

    pub fn get_at(&self, now: Instant) -> Option<T> {
        let slot = self.slot.lock();
        let entry = slot.as_ref()?;
        if now.saturating_duration_since(entry.created_at) > self.ttl {
            return None;
        }
        Some(entry.payload.clone())
    }

    pub fn set(&self, payload: T) {
        self.set_at(payload, Instant::now());
    }

    pub fn set_at(&self, payload: T, created_at: Instant) {
        *self.slot.lock() = Some(CacheEntry {
            payload,
            created_at,
        });
    }

    /// Return the cached payload, or run `refresh` and cache its result.
    /// `force` skips the cache read.  Failed refreshes leave the slot as is.
    pub async fn get_or_try_refresh<F, Fut, E>(&self, force: bool, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !force {
            if let Some(hit) = self.get() {
                debug!(cache = self.name, "cache hit");
                return Ok(hit);
            }
        }

        let _guard = self.refresh_guard.lock().await;
        if !force {
            if let Some(hit) = self.get() {
                debug!(cache = self.name, "cache filled by concurrent refresh");
                return Ok(hit);
            }
        }

        debug!(cache = self.name, force, "refreshing cache");
        let fresh = refresh().await?;
        self.set(fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn empty_cache_returns_none() {
        let cache: TtlCache<u32> = TtlCache::new("test", Duration::from_secs(60));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn entry_is_valid_up_to_and_including_ttl() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        let t0 = Instant::now();
        cache.set_at("payload", t0);

        assert_eq!(cache.get_at(t0), Some("payload"));
        assert_eq!(cache.get_at(t0 + Duration::from_secs(60)), Some("payload"));
        assert_eq!(cache.get_at(t0 + Duration::from_millis(60_001)), None);
    }

    #[test]
    fn set_overwrites_stale_entry() {
        let cache = TtlCache::new("test", Duration::from_secs(1));
        let t0 = Instant::now();
        cache.set_at(1, t0);
        let later = t0 + Duration::from_secs(5);
        assert_eq!(cache.get_at(later), None);

        cache.set_at(2, later);
        assert_eq!(cache.get_at(later), Some(2));
    }

    #[test]
    fn instances_do_not_share_state() {
        let funding = TtlCache::new("funding", Duration::from_secs(60));
        let calendar: TtlCache<u32> = TtlCache::new("calendar", Duration::from_secs(300));
        funding.set(7_u32);
        assert_eq!(funding.get(), Some(7));
        assert_eq!(calendar.get(), None);
        assert_eq!(calendar.ttl(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_runs_only_when_stale() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let refresh = move || async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) + 1) };

        assert_eq!(cache.get_or_try_refresh(false, refresh).await, Ok(1));
        assert_eq!(cache.get_or_try_refresh(false, refresh).await, Ok(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get_or_try_refresh(false, refresh).await, Ok(2));

        assert_eq!(cache.get_or_try_refresh(true, refresh).await, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.set(10);
        let result = cache
            .get_or_try_refresh(true, || async { Err::<i32, _>("upstream down") })
            .await;
        assert_eq!(result, Err("upstream down"));
        assert_eq!(cache.get(), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_hit_upstream_once() {
        let cache = Arc::new(TtlCache::new("test", Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_refresh(false, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok::<_, String>("fresh")
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok("fresh"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
