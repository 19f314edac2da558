//! In-process counter store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CounterSnapshot, CounterStore, StoreError};

/// Keys kept before expired windows are swept out.
const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// Marks a sweep in progress.
const SWEEPING: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// Counter store backed by a sharded concurrent map.
///
/// Each increment holds the shard lock for its key for the whole
/// check-reset-increment, which makes it atomic with respect to other
/// requests in this process. Use a shared store when several processes
/// must agree on one quota.
///
/// Expired windows are swept once the map outgrows the sweep threshold.
/// After a sweep the threshold becomes twice the surviving key count, so
/// a map full of live keys is not rescanned on every increment.
#[derive(Debug)]
pub struct MemoryCounterStore {
    windows: DashMap<String, Window>,
    min_sweep_threshold: usize,
    next_sweep_at: AtomicUsize,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    /// Sweep expired windows once more than `threshold` keys are held.
    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            windows: DashMap::new(),
            min_sweep_threshold: threshold,
            next_sweep_at: AtomicUsize::new(threshold),
        }
    }

    /// Number of keys currently tracked (expired or not).
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every window whose expiry has passed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, w| w.expires_at > now);
    }

    /// Key count that triggers the next sweep.
    pub fn sweep_threshold(&self) -> usize {
        match self.next_sweep_at.load(Ordering::Acquire) {
            SWEEPING => self.min_sweep_threshold,
            threshold => threshold,
        }
    }

    /// Sweep if the map has outgrown the threshold and no other caller is
    /// already sweeping.
    fn maybe_sweep(&self) {
        let threshold = self.next_sweep_at.load(Ordering::Acquire);
        if threshold == SWEEPING || self.windows.len() <= threshold {
            return;
        }
        if self
            .next_sweep_at
            .compare_exchange(threshold, SWEEPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.purge_expired();
        let survivors = self.windows.len();
        let next = survivors.saturating_mul(2).max(self.min_sweep_threshold);
        self.next_sweep_at.store(next, Ordering::Release);
        tracing::debug!(survivors, next_sweep_at = next, "Swept expired rate-limit windows");
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, StoreError> {
        self.maybe_sweep();

        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + window,
            };
        }
        entry.count += 1;

        Ok(CounterSnapshot {
            count: entry.count,
            ttl: entry.expires_at.saturating_duration_since(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn counts_within_window_and_resets_after() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(10);

        assert_eq!(store.increment("k", window).await.unwrap().count, 1);
        tokio::time::advance(Duration::from_secs(4)).await;
        let snap = store.increment("k", window).await.unwrap();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.ttl, Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        let snap = store.increment("k", window).await.unwrap();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.ttl, window);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(1);
        store.increment("a", window).await.unwrap();
        store.increment("a", window).await.unwrap();
        assert_eq!(store.increment("b", window).await.unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_expired_keys() {
        let store = MemoryCounterStore::with_sweep_threshold(2);
        let window = Duration::from_secs(1);
        for key in ["a", "b", "c"] {
            store.increment(key, window).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        store.increment("d", window).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_keys_raise_the_threshold_instead_of_resweeping() {
        let store = MemoryCounterStore::with_sweep_threshold(2);
        let window = Duration::from_secs(1);
        for key in ["a", "b", "c", "d"] {
            store.increment(key, window).await.unwrap();
        }
        // the fourth increment swept three live keys
        assert_eq!(store.sweep_threshold(), 6);

        tokio::time::advance(Duration::from_secs(2)).await;
        store.increment("e", window).await.unwrap();
        store.increment("f", window).await.unwrap();
        // below the raised threshold: expired keys are still held
        assert_eq!(store.len(), 6);

        tokio::time::advance(Duration::from_secs(2)).await;
        store.increment("g", window).await.unwrap();
        store.increment("h", window).await.unwrap();
        // 7 expired keys > 6 triggers the next sweep, leaving only the newest
        assert_eq!(store.len(), 1);
        assert_eq!(store.sweep_threshold(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new());
        let window = Duration::from_secs(60);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store.increment("shared", window).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.increment("shared", window).await.unwrap().count, 2001);
    }
}
