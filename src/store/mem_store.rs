use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use crate::error::StoreError;
use crate::store::{Hit, Limit, Store};

pub const DEFAULT_STORE_CAPACITY: usize = 4096;

/// Entries whose window ended more than this many windows ago are reaped.
pub const DEFAULT_SWEEP_GRACE_WINDOWS: u32 = 2;

/// [Counter] stores a subject's limit, the start of its
/// current window and the count within that window.
#[derive(Debug, Clone)]
pub(crate) struct Counter {
    pub limit: Limit,
    /// `None` until the first request is counted.
    pub window_start: Option<Instant>,
    pub count: u64,
}

impl Counter {
    pub fn new(limit: Limit) -> Self {
        Self {
            limit,
            window_start: None,
            count: 0,
        }
    }

    /// Check if the current window has elapsed at instant.
    pub fn expired_at(&self, window: Duration, instant: Instant) -> bool {
        match self.window_start {
            Some(start) => instant.duration_since(start) >= window,
            None => true,
        }
    }

    /// Check if the counter has been idle for more than `grace` windows
    /// after its last window ended. Never-used counters are kept: they
    /// are provisioned but have not seen traffic yet.
    pub fn stale_at(&self, grace: u32, instant: Instant) -> bool {
        match self.window_start {
            Some(start) => self.limit.window()
                .checked_mul(grace.saturating_add(1))
                .is_some_and(|idle| instant.duration_since(start) >= idle),
            None => false,
        }
    }
}

/// [MemStore] counts requests in process memory.
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct MemStore {
    pub(crate) inner: Arc<Mutex<MemStoreInner>>,
}

impl MemStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemStoreInner::new(capacity))),
        }
    }

    /// Number of subjects currently tracked.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes counters idle for more than `grace_windows` windows,
    /// returns how many were removed.
    pub async fn sweep(&self, grace_windows: u32) -> usize {
        self.inner.lock().await.sweep(grace_windows, Instant::now())
    }

    /// Spawns a task calling [Self::sweep] every `period`.
    ///
    /// The task stops by itself once every clone of this store is dropped.
    /// Must be called within a tokio runtime.
    pub fn spawn_sweeper(&self, period: Duration, grace_windows: u32) -> JoinHandle<()> {
        let inner: Weak<Mutex<MemStoreInner>> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let removed = inner.lock().await.sweep(grace_windows, Instant::now());
                if removed > 0 {
                    debug!(removed, "swept idle counters");
                }
            }
        })
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn provision(&self, key: &str, limit: Limit) -> Result<(), StoreError> {
        self.inner.lock().await.provision(key, limit);
        Ok(())
    }

    async fn limit(&self, key: &str) -> Result<Option<Limit>, StoreError> {
        Ok(self.inner.lock().await.limit(key))
    }

    async fn check_and_incr(&self, key: &str, limit: Limit) -> Result<Hit, StoreError> {
        Ok(self.inner.lock().await.check_and_incr(key, limit, Instant::now()))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MemStoreInner {
    pub(crate) data: HashMap<String, Counter>,
}

impl MemStoreInner {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: HashMap::with_capacity(capacity),
        }
    }

    pub fn provision(&mut self, key: &str, limit: Limit) {
        match self.data.get_mut(key) {
            Some(counter) => counter.limit = limit,
            None => {
                self.data.insert(key.to_string(), Counter::new(limit));
            }
        }
    }

    pub fn limit(&self, key: &str) -> Option<Limit> {
        self.data.get(key).map(|counter| counter.limit)
    }

    pub fn check_and_incr(&mut self, key: &str, limit: Limit, now: Instant) -> Hit {
        // the entry may have been reaped since the limit was looked up
        let counter = self.data.entry(key.to_string())
            .or_insert_with(|| Counter::new(limit));
        counter.limit = limit;

        if counter.expired_at(limit.window(), now) {
            counter.window_start = Some(now);
            counter.count = 0;
        }

        counter.count += 1;

        let reset_at = counter.window_start
            .map(|start| limit.window().saturating_sub(now.duration_since(start)))
            .and_then(|left| chrono::Duration::from_std(left).ok())
            .and_then(|left| Utc::now().checked_add_signed(left));

        Hit {
            count: counter.count,
            limit,
            reset_at,
        }
    }

    pub fn sweep(&mut self, grace_windows: u32, now: Instant) -> usize {
        let before = self.data.len();
        self.data.retain(|_, counter| !counter.stale_at(grace_windows, now));
        before - self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counts_within_window() -> Result<(), StoreError> {
        let store = MemStore::new(8);
        let limit = Limit::new(3, 10);

        assert_eq!(store.check_and_incr("John", limit).await?.count, 1);
        assert_eq!(store.check_and_incr("John", limit).await?.count, 2);
        assert_eq!(store.check_and_incr("Meg", limit).await?.count, 1);

        let cloned = store.clone();
        let hit = cloned.check_and_incr("John", limit).await?;
        assert_eq!(hit.count, 3);
        assert!(hit.admitted());

        let hit = store.check_and_incr("John", limit).await?;
        assert_eq!(hit.count, 4);
        assert!(!hit.admitted());
        assert!(hit.reset_at.is_some());

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets() -> Result<(), StoreError> {
        let store = MemStore::new(8);
        let limit = Limit::new(1, 5);

        assert!(store.check_and_incr("John", limit).await?.admitted());

        // wait 2 seconds to add a new one...
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.check_and_incr("Meg", limit).await?.admitted());
        assert!(!store.check_and_incr("John", limit).await?.admitted());

        // 5 seconds after John's first request, his window is over while Meg's is not.
        tokio::time::advance(Duration::from_secs(3)).await;
        let hit = store.check_and_incr("John", limit).await?;
        assert!(hit.admitted());
        assert_eq!(hit.count, 1);
        assert!(!store.check_and_incr("Meg", limit).await?.admitted());

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn provision_keeps_running_count() -> Result<(), StoreError> {
        let store = MemStore::new(8);
        assert_eq!(store.limit("John").await?, None);

        store.provision("John", Limit::new(2, 60)).await?;
        assert_eq!(store.limit("John").await?, Some(Limit::new(2, 60)));

        assert!(store.check_and_incr("John", Limit::new(2, 60)).await?.admitted());
        assert!(store.check_and_incr("John", Limit::new(2, 60)).await?.admitted());

        // provisioning again replaces the limit, the count carries on
        store.provision("John", Limit::new(2, 60)).await?;
        assert_eq!(store.check_and_incr("John", Limit::new(2, 60)).await?.count, 3);

        store.provision("John", Limit::new(5, 60)).await?;
        assert_eq!(store.limit("John").await?, Some(Limit::new(5, 60)));
        let hit = store.check_and_incr("John", Limit::new(5, 60)).await?;
        assert_eq!(hit.count, 4);
        assert!(hit.admitted());

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn huge_windows_do_not_overflow() -> Result<(), StoreError> {
        let store = MemStore::new(8);
        let limit = Limit::new(1, u64::MAX);

        let hit = store.check_and_incr("John", limit).await?;
        assert!(hit.admitted());
        assert_eq!(hit.reset_at, None);
        assert!(!store.check_and_incr("John", limit).await?.admitted());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(store.sweep(u32::MAX).await, 0);
        assert_eq!(store.sweep(DEFAULT_SWEEP_GRACE_WINDOWS).await, 0);
        assert!(!store.check_and_incr("John", limit).await?.admitted());

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_idle_counters() -> Result<(), StoreError> {
        let store = MemStore::new(8);
        let limit = Limit::new(1, 1);

        store.provision("idle", limit).await?;
        store.check_and_incr("John", limit).await?;
        tokio::time::advance(Duration::from_millis(2500)).await;
        store.check_and_incr("Meg", limit).await?;

        assert_eq!(store.sweep(DEFAULT_SWEEP_GRACE_WINDOWS).await, 0);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(store.sweep(DEFAULT_SWEEP_GRACE_WINDOWS).await, 1);
        assert_eq!(store.limit("John").await?, None);
        assert_eq!(store.limit("Meg").await?, Some(limit));
        // provisioned but never used
        assert_eq!(store.limit("idle").await?, Some(limit));
        assert_eq!(store.len().await, 2);

        // a reaped subject is counted from scratch
        assert_eq!(store.check_and_incr("John", limit).await?.count, 1);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_periodically() -> Result<(), StoreError> {
        let store = MemStore::new(8);
        store.check_and_incr("John", Limit::new(1, 1)).await?;

        let handle = store.spawn_sweeper(Duration::from_secs(1), 0);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.is_empty().await);

        drop(store);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());

        Ok(())
    }

    #[tokio::test]
    async fn concurrent_increments_are_serialized() -> Result<(), StoreError> {
        let store = MemStore::new(8);
        let limit = Limit::new(10, 60);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.check_and_incr("John", limit).await })
            })
            .collect();

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.expect("task panicked")?.count);
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
        assert_eq!(counts.iter().filter(|count| **count <= limit.requests).count(), 10);

        Ok(())
    }
}
