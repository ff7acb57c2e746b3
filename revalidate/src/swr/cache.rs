use crate::domain::{CacheEntry, CacheKey, Freshness, LoadState};
use crate::events::{
    CacheEvent, ClearedEvent, InvalidatedEvent, RefreshFailedEvent, RefreshedEvent, ServedEvent,
};
use crate::ports::{Cacheable, EntryStore, RemoteFetch};
use crate::swr::inflight::{InFlight, SharedFetch};
use futures::future::{BoxFuture, FutureExt};
use shared::time::now_ms;
use shared::{Error, Result, TtlMs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one fetch, tagged with the generation it was started in.
struct FetchOutcome<T> {
    generation: u64,
    result: Result<CacheEntry<T>>,
}

impl<T> Clone for FetchOutcome<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            result: self.result.clone(),
        }
    }
}

/// Read-through cache for one resource list with stale-while-revalidate loads.
///
/// Built once at startup and cloned into every consumer; clones share the
/// same slot, state channel and in-flight fetch.
pub struct StaleWhileRevalidate<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    key: CacheKey,
    storage_key: String,
    ttl: TtlMs,
    store: Arc<dyn EntryStore>,
    fetcher: Arc<dyn RemoteFetch<T>>,
    state: watch::Sender<LoadState<T>>,
    inflight: InFlight<FetchOutcome<T>>,
    /// Bumped by every invalidate; fetches from older generations are not stored
    generation: AtomicU64,
    /// Serialises storage commits against invalidation
    commit: Mutex<()>,
    event_broadcaster: Option<broadcast::Sender<CacheEvent>>,
}

impl<T> Clone for StaleWhileRevalidate<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// First phase of a [`StaleWhileRevalidate::load`]: what was shown right away,
/// plus the pending refresh.
///
/// The refresh runs on its own task. Dropping this value only discards the
/// result for this caller; the fetch still completes, updates storage and
/// publishes to subscribers.
pub struct Revalidation<T> {
    initial: LoadState<T>,
    refresh: BoxFuture<'static, LoadState<T>>,
}

impl<T> Revalidation<T>
where
    T: Cacheable,
{
    /// `true` when a cached payload was shown without waiting on the network.
    pub fn immediately_available(&self) -> bool {
        self.initial.entry().is_some()
    }

    pub fn initial(&self) -> &LoadState<T> {
        &self.initial
    }

    /// Items available before the refresh resolves.
    pub fn items(&self) -> &[T] {
        self.initial.items()
    }

    /// Wait for the refresh and return the state published after it.
    pub async fn finish(self) -> LoadState<T> {
        self.refresh.await
    }

    pub fn spawn(self) -> JoinHandle<LoadState<T>> {
        tokio::spawn(self.refresh)
    }
}

impl<T> StaleWhileRevalidate<T>
where
    T: Cacheable,
{
    pub fn new(
        key: CacheKey,
        ttl: TtlMs,
        store: Arc<dyn EntryStore>,
        fetcher: Arc<dyn RemoteFetch<T>>,
    ) -> Self {
        Self::build(key, ttl, store, fetcher, None)
    }

    pub fn with_event_broadcaster(
        key: CacheKey,
        ttl: TtlMs,
        store: Arc<dyn EntryStore>,
        fetcher: Arc<dyn RemoteFetch<T>>,
        broadcaster: broadcast::Sender<CacheEvent>,
    ) -> Self {
        Self::build(key, ttl, store, fetcher, Some(broadcaster))
    }

    fn build(
        key: CacheKey,
        ttl: TtlMs,
        store: Arc<dyn EntryStore>,
        fetcher: Arc<dyn RemoteFetch<T>>,
        event_broadcaster: Option<broadcast::Sender<CacheEvent>>,
    ) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            inner: Arc::new(Inner {
                storage_key: key.storage_key(),
                key,
                ttl,
                store,
                fetcher,
                state,
                inflight: InFlight::new(),
                generation: AtomicU64::new(0),
                commit: Mutex::new(()),
                event_broadcaster,
            }),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn ttl(&self) -> TtlMs {
        self.inner.ttl
    }

    /// Receiver that always holds the latest published state.
    pub fn subscribe(&self) -> watch::Receiver<LoadState<T>> {
        self.inner.state.subscribe()
    }

    pub fn current(&self) -> LoadState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.inflight.is_running()
    }

    /// Show whatever storage holds without touching the network.
    pub async fn init(&self) -> LoadState<T> {
        if let Some(entry) = self.inner.read_entry().await {
            let freshness = entry.freshness(now_ms(), self.inner.ttl);
            self.inner.publish(LoadState::Stale { entry, freshness });
        }
        self.current()
    }

    /// Serve the stored payload (expired or not) right away and refresh it
    /// from the remote source.
    pub async fn load(&self) -> Revalidation<T> {
        let initial = match self.inner.read_entry().await {
            Some(entry) => {
                let freshness = entry.freshness(now_ms(), self.inner.ttl);
                debug!(
                    "Serving {} item(s) from '{}' ({:?}, age {} ms)",
                    entry.len(),
                    self.inner.storage_key,
                    freshness,
                    entry.age_ms(now_ms())
                );
                self.inner.emit(CacheEvent::ServedFromCache(ServedEvent {
                    cache_key: self.inner.storage_key.clone(),
                    item_count: entry.len(),
                    stored_at: entry.stored_at,
                    expired: freshness == Freshness::Expired,
                    timestamp: now_ms(),
                }));
                self.inner.publish(LoadState::Stale { entry, freshness });
                // A fresher payload may already be showing; report that one
                self.current()
            }
            None => {
                debug!("No usable entry for '{}', loading", self.inner.storage_key);
                // Subscribers keep a payload that storage no longer holds
                // (refused write, invalidate) until the fetch settles
                self.inner.state.send_if_modified(|current| {
                    if current.entry().is_some() {
                        return false;
                    }
                    *current = LoadState::Loading;
                    true
                });
                LoadState::Loading
            }
        };

        let fetch = Inner::start_or_join(&self.inner);
        let inner = Arc::clone(&self.inner);
        let refresh = async move {
            let outcome = fetch.await;
            if outcome.generation == inner.generation.load(Ordering::SeqCst) {
                // Already published by the fetch itself
                inner.state.borrow().clone()
            } else {
                inner.detached_state(outcome.result)
            }
        }
        .boxed();

        Revalidation { initial, refresh }
    }

    /// Delete the stored entry; the next load is a cold start.
    ///
    /// Returns whether an entry was stored. Storage failures count as `false`.
    ///
    /// A fetch still in flight is detached: it completes for its callers but
    /// is neither stored nor published.
    pub async fn invalidate(&self) -> bool {
        let _commit = self.inner.commit.lock().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if self.inner.inflight.detach() {
            debug!(
                "Detached in-flight fetch for '{}' on invalidate",
                self.inner.storage_key
            );
        }

        let existed = match self.inner.store.remove(&self.inner.storage_key).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(
                    "Failed to remove '{}' from storage: {}",
                    self.inner.storage_key, e
                );
                false
            }
        };

        self.inner.emit(CacheEvent::Invalidated(InvalidatedEvent {
            cache_key: self.inner.storage_key.clone(),
            existed,
            timestamp: now_ms(),
        }));

        existed
    }

    /// [`invalidate`](Self::invalidate) followed by [`load`](Self::load).
    pub async fn refetch(&self) -> Revalidation<T> {
        self.invalidate().await;
        self.load().await
    }

    /// Invalidate and reset subscribers to [`LoadState::Idle`].
    pub async fn clear(&self) {
        self.invalidate().await;
        self.inner.state.send_replace(LoadState::Idle);
        info!("Cleared cache '{}'", self.inner.storage_key);
        self.inner.emit(CacheEvent::Cleared(ClearedEvent {
            cache_key: self.inner.storage_key.clone(),
            timestamp: now_ms(),
        }));
    }

    /// Remove the stored entry if it is past its TTL or unreadable.
    ///
    /// Returns whether anything was removed.
    pub async fn purge_expired(&self) -> bool {
        let bytes = match self.inner.store.read(&self.inner.storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to read '{}' for purge: {}", self.inner.storage_key, e);
                return false;
            }
        };

        let reason = match CacheEntry::<T>::decode(&self.inner.key, &bytes) {
            Ok(entry) if entry.is_valid(now_ms(), self.inner.ttl) => return false,
            Ok(_) => "expired",
            Err(_) => "corrupt",
        };

        match self.inner.store.remove(&self.inner.storage_key).await {
            Ok(removed) => {
                info!("Purged {} entry '{}'", reason, self.inner.storage_key);
                removed
            }
            Err(e) => {
                warn!("Failed to purge '{}': {}", self.inner.storage_key, e);
                false
            }
        }
    }
}

impl<T> Inner<T>
where
    T: Cacheable,
{
    fn start_or_join(this: &Arc<Self>) -> SharedFetch<FetchOutcome<T>> {
        let (fetch, started) = this.inflight.join_or_start(|| {
            let inner = Arc::clone(this);
            let generation = this.generation.load(Ordering::SeqCst);
            async move {
                let result = inner.fetch_and_store(generation).await;
                FetchOutcome { generation, result }
            }
            .boxed()
        });

        if started {
            // Drive the fetch even if every caller drops its Revalidation
            tokio::spawn(fetch.clone());
        } else {
            debug!("Joining in-flight fetch for '{}'", this.storage_key);
        }

        fetch
    }

    async fn fetch_and_store(&self, generation: u64) -> Result<CacheEntry<T>> {
        let fetched = self.fetcher.fetch_all().await;

        let _commit = self.commit.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(
                "Discarding result of detached fetch for '{}'",
                self.storage_key
            );
            return fetched.map(|items| CacheEntry::new(items, now_ms()));
        }

        match fetched {
            Ok(items) => {
                let entry = CacheEntry::new(items, now_ms());
                self.write_entry(&entry).await;

                info!("Refreshed '{}' with {} item(s)", self.storage_key, entry.len());
                self.emit(CacheEvent::Refreshed(RefreshedEvent {
                    cache_key: self.storage_key.clone(),
                    item_count: entry.len(),
                    timestamp: now_ms(),
                }));

                self.publish(LoadState::Fresh(entry.clone()));
                Ok(entry)
            }
            Err(error) => {
                warn!("Refresh of '{}' failed: {}", self.storage_key, error);
                let kept_items = self.publish_failure(error.clone());
                self.emit(CacheEvent::RefreshFailed(RefreshFailedEvent {
                    cache_key: self.storage_key.clone(),
                    error: error.to_string(),
                    kept_items,
                    timestamp: now_ms(),
                }));
                Err(error)
            }
        }
    }

    /// State reported to the callers of a fetch that was detached while running.
    fn detached_state(&self, result: Result<CacheEntry<T>>) -> LoadState<T> {
        match result {
            Ok(entry) => LoadState::Fresh(entry),
            Err(error) => LoadState::Error {
                error,
                last_known: self.state.borrow().entry().cloned(),
            },
        }
    }

    /// Read and decode the stored entry. Storage and decode failures are misses.
    async fn read_entry(&self) -> Option<CacheEntry<T>> {
        let bytes = match self.store.read(&self.storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    "Failed to read '{}' from storage, treating as miss: {}",
                    self.storage_key, e
                );
                return None;
            }
        };

        match CacheEntry::decode(&self.key, &bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Discarding unreadable entry '{}': {}", self.storage_key, e);
                None
            }
        }
    }

    async fn write_entry(&self, entry: &CacheEntry<T>) {
        let bytes = match entry.encode(&self.key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode '{}': {}", self.storage_key, e);
                return;
            }
        };

        if let Err(e) = self.store.write(&self.storage_key, bytes).await {
            warn!("Failed to save '{}' to storage: {}", self.storage_key, e);
        }
    }

    /// Publish a state carrying a payload, unless an entry stored later is
    /// already showing.
    fn publish(&self, next: LoadState<T>) -> bool {
        self.state.send_if_modified(|current| {
            if let (Some(shown), Some(incoming)) = (current.entry(), next.entry()) {
                let older = incoming.stored_at < shown.stored_at;
                let same_but_weaker = incoming.stored_at == shown.stored_at
                    && current.is_fresh()
                    && !next.is_fresh();
                if older || same_but_weaker {
                    return false;
                }
            }
            *current = next;
            true
        })
    }

    /// Publish an error, keeping whatever payload is showing. Returns its size.
    fn publish_failure(&self, error: Error) -> usize {
        let mut kept = 0;
        self.state.send_modify(|current| {
            let last_known = current.entry().cloned();
            kept = last_known.as_ref().map_or(0, CacheEntry::len);
            *current = LoadState::Error { error, last_known };
        });
        kept
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(ref broadcaster) = self.event_broadcaster {
            if broadcaster.send(event).is_err() {
                debug!("No subscribers for events of '{}'", self.storage_key);
            }
        }
    }
}

impl<T> std::fmt::Debug for StaleWhileRevalidate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleWhileRevalidate")
            .field("key", &self.inner.storage_key)
            .field("ttl", &self.inner.ttl)
            .field("status", &self.inner.state.borrow().status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Dish, MemoryStore, ScriptedFetch, dish};

    const MINUTE_MS: u64 = 60 * 1000;

    fn key() -> CacheKey {
        CacheKey::new("products")
    }

    fn menu_v1() -> Vec<Dish> {
        vec![dish("nigiri", 4.5), dish("maki", 6.0)]
    }

    fn menu_v2() -> Vec<Dish> {
        vec![dish("nigiri", 5.0), dish("maki", 6.0), dish("ramen", 11.0)]
    }

    fn cache_with(
        store: &Arc<MemoryStore>,
        fetch: &Arc<ScriptedFetch>,
    ) -> StaleWhileRevalidate<Dish> {
        StaleWhileRevalidate::new(key(), TtlMs::DEFAULT, store.clone(), fetch.clone())
    }

    #[tokio::test]
    async fn test_cold_start_waits_for_fetch() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v1())]));
        let cache = cache_with(&store, &fetch);

        let before = now_ms();
        let revalidation = cache.load().await;
        assert!(!revalidation.immediately_available());
        assert!(revalidation.items().is_empty());
        assert!(revalidation.initial().is_loading());

        let state = revalidation.finish().await;
        assert!(state.is_fresh());
        assert_eq!(state.items(), menu_v1().as_slice());
        assert_eq!(cache.current(), state);

        let stored = store.stored(&key()).unwrap();
        assert_eq!(stored.items(), menu_v1().as_slice());
        assert!(stored.stored_at >= before);
        assert_eq!(fetch.calls(), 1);
    }

    #[tokio::test]
    async fn test_warm_fresh_entry_shown_then_replaced() {
        let store = Arc::new(MemoryStore::default());
        store.seed(&key(), menu_v1(), now_ms() - MINUTE_MS);
        let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        let revalidation = cache.load().await;
        assert!(revalidation.immediately_available());
        assert_eq!(revalidation.items(), menu_v1().as_slice());
        assert!(matches!(
            revalidation.initial(),
            LoadState::Stale {
                freshness: Freshness::Valid,
                ..
            }
        ));

        let state = revalidation.finish().await;
        assert!(state.is_fresh());
        assert_eq!(state.items(), menu_v2().as_slice());
        assert_eq!(store.stored(&key()).unwrap().items(), menu_v2().as_slice());
    }

    #[tokio::test]
    async fn test_expired_entry_still_shown_immediately() {
        let store = Arc::new(MemoryStore::default());
        store.seed(&key(), menu_v1(), now_ms() - 10 * MINUTE_MS);
        let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        let revalidation = cache.load().await;
        assert!(revalidation.immediately_available());
        assert_eq!(revalidation.items(), menu_v1().as_slice());
        assert_eq!(revalidation.initial().status(), "stale-expired");

        let state = revalidation.finish().await;
        assert_eq!(state.items(), menu_v2().as_slice());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_stale_payload() {
        let store = Arc::new(MemoryStore::default());
        store.seed(&key(), menu_v1(), now_ms() - 10 * MINUTE_MS);
        let seeded = store.raw("products_cache").unwrap();
        let fetch = Arc::new(ScriptedFetch::new(vec![Err(Error::Transient(
            "connection refused".into(),
        ))]));
        let cache = cache_with(&store, &fetch);

        let state = cache.load().await.finish().await;
        assert_eq!(
            state.error(),
            Some(&Error::Transient("connection refused".into()))
        );
        assert_eq!(state.items(), menu_v1().as_slice());
        assert_eq!(store.raw("products_cache").unwrap(), seeded);
    }

    #[tokio::test]
    async fn test_cold_start_failure_reports_error_without_data() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::new(vec![Err(Error::Decode(
            "expected array".into(),
        ))]));
        let cache = cache_with(&store, &fetch);

        let state = cache.load().await.finish().await;
        assert!(matches!(
            state,
            LoadState::Error {
                last_known: None,
                ..
            }
        ));
        assert!(state.items().is_empty());
        assert!(store.raw("products_cache").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_then_load_is_cold_start() {
        let store = Arc::new(MemoryStore::default());
        store.seed(&key(), menu_v1(), now_ms());
        let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        assert!(cache.invalidate().await);
        assert!(store.raw("products_cache").is_none());
        assert!(!cache.invalidate().await);

        let revalidation = cache.load().await;
        assert!(!revalidation.immediately_available());
        let state = revalidation.finish().await;
        assert_eq!(state.items(), menu_v2().as_slice());
        assert!(store.stored(&key()).is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entries_are_cold_starts() {
        for raw in [
            &b"{not json"[..],
            &br#"{"products":3,"timestamp":1}"#[..],
            &br#"{"items":[],"timestamp":1}"#[..],
            &br#"{"products":[]}"#[..],
        ] {
            let store = Arc::new(MemoryStore::default());
            store.put_raw("products_cache", raw);
            let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v1())]));
            let cache = cache_with(&store, &fetch);

            let revalidation = cache.load().await;
            assert!(!revalidation.immediately_available());
            let state = revalidation.finish().await;
            assert!(state.is_fresh());
            assert_eq!(store.stored(&key()).unwrap().items(), menu_v1().as_slice());
        }
    }

    #[tokio::test]
    async fn test_storage_failures_degrade_to_no_cache() {
        let store = Arc::new(MemoryStore::default());
        store.seed(&key(), menu_v1(), now_ms());
        store.fail_reads.store(true, Ordering::SeqCst);
        store.fail_writes.store(true, Ordering::SeqCst);
        let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        let revalidation = cache.load().await;
        assert!(!revalidation.immediately_available());
        let state = revalidation.finish().await;
        assert!(state.is_fresh());
        assert_eq!(state.items(), menu_v2().as_slice());

        // The write was refused, the old blob is untouched
        store.fail_reads.store(false, Ordering::SeqCst);
        assert_eq!(store.stored(&key()).unwrap().items(), menu_v1().as_slice());
        assert!(!cache.invalidate().await);
    }

    async fn wait_for_calls(fetch: &ScriptedFetch, calls: usize) {
        while fetch.calls() < calls {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_failure_after_refused_write_keeps_shown_payload() {
        let store = Arc::new(MemoryStore::default());
        store.fail_writes.store(true, Ordering::SeqCst);
        let fetch = Arc::new(ScriptedFetch::gated(vec![
            Ok(menu_v1()),
            Err(Error::Transient("offline".into())),
        ]));
        let cache = cache_with(&store, &fetch);

        fetch.release();
        assert!(cache.load().await.finish().await.is_fresh());
        assert!(store.raw("products_cache").is_none());

        // Storage is empty, so this is a cold start for the caller only
        let second = cache.load().await;
        assert!(!second.immediately_available());
        assert!(cache.current().is_fresh());

        fetch.release();
        let state = second.finish().await;
        assert!(state.error().is_some_and(|e| e.is_transient()));
        assert_eq!(state.items(), menu_v1().as_slice());
        assert!(matches!(
            state,
            LoadState::Error {
                last_known: Some(_),
                ..
            }
        ));
        assert_eq!(cache.current(), state);
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_shown_payload() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::new(vec![
            Ok(menu_v1()),
            Err(Error::Transient("502 bad gateway".into())),
        ]));
        let cache = cache_with(&store, &fetch);

        cache.load().await.finish().await;

        let refetch = cache.refetch().await;
        assert!(!refetch.immediately_available());
        let state = refetch.finish().await;

        assert!(state.error().is_some());
        assert_eq!(state.items(), menu_v1().as_slice());
        assert!(store.raw("products_cache").is_none());
        assert_eq!(fetch.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_during_fetch_is_not_undone() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::gated(vec![Ok(menu_v1())]));
        let cache = cache_with(&store, &fetch);

        let pending = cache.load().await;
        wait_for_calls(&fetch, 1).await;
        cache.clear().await;

        fetch.release();
        // The caller that started the fetch still gets its result
        let state = pending.finish().await;
        assert_eq!(state.items(), menu_v1().as_slice());

        assert_eq!(cache.current(), LoadState::Idle);
        assert!(store.raw("products_cache").is_none());
        assert!(!cache.load().await.immediately_available());
    }

    #[tokio::test]
    async fn test_detached_fetch_never_overwrites_refetch() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::gated(vec![Ok(menu_v1()), Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        let first = cache.load().await;
        wait_for_calls(&fetch, 1).await;
        let second = cache.refetch().await;
        wait_for_calls(&fetch, 2).await;

        // Permits are handed out in call order: the detached fetch gets menu_v1
        fetch.release();
        assert_eq!(first.finish().await.items(), menu_v1().as_slice());
        assert!(cache.current().is_loading());
        assert!(store.raw("products_cache").is_none());

        fetch.release();
        let state = second.finish().await;
        assert!(state.is_fresh());
        assert_eq!(state.items(), menu_v2().as_slice());
        assert_eq!(store.stored(&key()).unwrap().items(), menu_v2().as_slice());
    }

    #[tokio::test]
    async fn test_overlapping_loads_share_one_fetch() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::gated(vec![Ok(menu_v1()), Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        let first = cache.load().await;
        let second = cache.clone().load().await;
        assert!(cache.is_refreshing());

        fetch.release();
        let (a, b) = tokio::join!(first.finish(), second.finish());
        assert_eq!(a.items(), menu_v1().as_slice());
        assert_eq!(b.items(), menu_v1().as_slice());
        assert_eq!(fetch.calls(), 1);
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_refetch_always_hits_network() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::gated(vec![Ok(menu_v1()), Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        let first = cache.load().await;
        let second = cache.refetch().await;
        assert!(!second.immediately_available());

        fetch.release();
        fetch.release();
        first.finish().await;
        second.finish().await;

        assert_eq!(fetch.calls(), 2);
        assert!(cache.current().is_fresh());
    }

    #[tokio::test]
    async fn test_second_load_does_not_downgrade_fresh_state() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::gated(vec![Ok(menu_v1()), Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);

        fetch.release();
        cache.load().await.finish().await;
        assert!(cache.current().is_fresh());

        // Storage now holds the same entry that is showing
        let again = cache.load().await;
        assert!(again.immediately_available());
        assert!(again.initial().is_fresh());
        assert_eq!(again.items(), menu_v1().as_slice());

        fetch.release();
        assert_eq!(again.finish().await.items(), menu_v2().as_slice());
    }

    #[tokio::test]
    async fn test_dropped_revalidation_still_publishes() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v2())]));
        let cache = cache_with(&store, &fetch);
        let mut rx = cache.subscribe();

        drop(cache.load().await);

        let state = rx.wait_for(|state| state.is_fresh()).await.unwrap().clone();
        assert_eq!(state.items(), menu_v2().as_slice());
        assert!(store.stored(&key()).is_some());
    }

    #[tokio::test]
    async fn test_init_shows_storage_without_fetching() {
        let store = Arc::new(MemoryStore::default());
        store.seed(&key(), menu_v1(), now_ms() - 10 * MINUTE_MS);
        let fetch = Arc::new(ScriptedFetch::new(vec![]));
        let cache = cache_with(&store, &fetch);

        let state = cache.init().await;
        assert_eq!(state.status(), "stale-expired");
        assert_eq!(state.items(), menu_v1().as_slice());
        assert_eq!(fetch.calls(), 0);
    }

    #[tokio::test]
    async fn test_clear_resets_subscribers() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::new(vec![Ok(menu_v1())]));
        let cache = cache_with(&store, &fetch);

        cache.load().await.finish().await;
        cache.clear().await;

        assert_eq!(cache.current(), LoadState::Idle);
        assert!(store.raw("products_cache").is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(MemoryStore::default());
        let fetch = Arc::new(ScriptedFetch::new(vec![]));
        let cache = cache_with(&store, &fetch);

        assert!(!cache.purge_expired().await);

        store.seed(&key(), menu_v1(), now_ms() - MINUTE_MS);
        assert!(!cache.purge_expired().await);
        assert!(store.raw("products_cache").is_some());

        store.seed(&key(), menu_v1(), now_ms() - 6 * MINUTE_MS);
        assert!(cache.purge_expired().await);
        assert!(store.raw("products_cache").is_none());

        store.put_raw("products_cache", b"garbage");
        assert!(cache.purge_expired().await);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let store = Arc::new(MemoryStore::default());
        store.seed(&key(), menu_v1(), now_ms());
        let fetch = Arc::new(ScriptedFetch::new(vec![Err(Error::Transient(
            "timeout".into(),
        ))]));
        let (tx, mut rx) = broadcast::channel(16);
        let cache = StaleWhileRevalidate::with_event_broadcaster(
            key(),
            TtlMs::DEFAULT,
            store.clone(),
            fetch.clone(),
            tx,
        );

        cache.load().await.finish().await;
        cache.invalidate().await;

        match rx.recv().await.unwrap() {
            CacheEvent::ServedFromCache(e) => {
                assert_eq!(e.cache_key, "products_cache");
                assert_eq!(e.item_count, 2);
                assert!(!e.expired);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            CacheEvent::RefreshFailed(e) => {
                assert_eq!(e.kept_items, 2);
                assert!(e.error.contains("timeout"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::Invalidated(InvalidatedEvent { existed: true, .. })
        ));
    }
}
