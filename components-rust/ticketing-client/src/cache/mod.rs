//! Cache-first access to server-sourced entities.
//!
//! [`EntityCache`] answers reads synchronously from memory. A miss spawns a
//! background fetch; concurrent misses for the same key join that one fetch
//! instead of issuing another request. Writes are applied optimistically and
//! carry the pre-mutation value so they can be rolled back if the server
//! rejects them.

use crate::api::ApiError;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const FETCH_MANY_CHUNK: usize = 10;

pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache cleared while the fetch was in flight")]
    Cleared,
}

impl From<ApiError> for CacheError {
    fn from(error: ApiError) -> Self {
        CacheError::Fetch(error.to_string())
    }
}

/// Source of truth behind an [`EntityCache`]. `Ok(None)` means the entity does
/// not exist on the server.
#[async_trait]
pub trait EntityFetcher<K, V>: Send + Sync
where
    K: CacheKey,
    V: CacheValue,
{
    async fn fetch(&self, key: &K) -> Result<Option<V>, ApiError>;

    /// Bulk variant. Keys missing from the result do not exist on the server.
    /// The default issues single fetches, ten at a time.
    async fn fetch_many(&self, keys: &[K]) -> Result<Vec<(K, V)>, ApiError> {
        let mut result = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(FETCH_MANY_CHUNK) {
            let tasks = chunk.iter().map(|key| async move {
                self.fetch(key)
                    .await
                    .map(|value| value.map(|value| (key.clone(), value)))
            });

            for response in join_all(tasks).await {
                result.extend(response?);
            }
        }

        Ok(result)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub name: &'static str,
    pub fetch_timeout: Duration,
}

impl CacheConfig {
    pub fn new(name: &'static str) -> Self {
        CacheConfig {
            name,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }
}

type FetchFuture<V> = Shared<BoxFuture<'static, Result<Option<V>, CacheError>>>;

type BulkFuture<K, V> = Shared<BoxFuture<'static, Result<Arc<HashMap<K, V>>, CacheError>>>;

type FetchHook<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

/// A running request for one key and the entry version it started from.
struct Flight<V> {
    id: u64,
    started_version: u64,
    future: FetchFuture<V>,
}

/// Final state of an optimistic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Confirmed,
    RolledBack,
    /// The entry changed again after this write; it was dropped so the next
    /// read refetches it.
    Invalidated,
    /// The cache was cleared while the write was pending.
    Discarded,
}

/// An optimistic write that has been applied locally and awaits the server.
#[must_use = "a pending write must be confirmed or rolled back"]
#[derive(Debug)]
pub struct PendingWrite<K, V> {
    id: Uuid,
    key: K,
    previous: Option<V>,
    version: u64,
    epoch: u64,
}

impl<K, V> PendingWrite<K, V> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn previous(&self) -> Option<&V> {
        self.previous.as_ref()
    }
}

struct State<K, V> {
    entries: HashMap<K, V>,
    in_flight: HashMap<K, Flight<V>>,
    next_flight: u64,
    versions: HashMap<K, u64>,
    pending_writes: HashSet<Uuid>,
    epoch: u64,
    last_error: Option<CacheError>,
}

impl<K: CacheKey, V: CacheValue> State<K, V> {
    fn touch(&mut self, key: &K) -> u64 {
        let version = self.versions.entry(key.clone()).or_insert(0);
        *version += 1;
        *version
    }

    fn version(&self, key: &K) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Releases the in-flight slot of `key` if `flight_id` still owns it.
    /// Returns `false` when a newer request replaced this one.
    fn finish_flight(&mut self, key: &K, flight_id: u64) -> bool {
        match self.in_flight.get(key) {
            Some(flight) if flight.id == flight_id => {
                self.in_flight.remove(key);
                true
            }
            _ => false,
        }
    }
}

struct Inner<K: CacheKey, V: CacheValue> {
    config: CacheConfig,
    fetcher: Arc<dyn EntityFetcher<K, V>>,
    on_fetched: Option<FetchHook<K, V>>,
    state: Mutex<State<K, V>>,
    revision: watch::Sender<u64>,
}

impl<K: CacheKey, V: CacheValue> Inner<K, V> {
    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn complete(
        &self,
        key: &K,
        epoch: u64,
        flight_id: u64,
        started_version: u64,
        result: Result<Option<V>, CacheError>,
    ) -> Result<Option<V>, CacheError> {
        let mut state = self.lock();
        if state.epoch != epoch {
            log::debug!(cache = self.config.name, key:? = key; "dropping fetch result from before clear");
            return Err(CacheError::Cleared);
        }
        if !state.finish_flight(key, flight_id) {
            // A newer request for this key owns the entry now.
            log::debug!(cache = self.config.name, key:? = key; "dropping superseded fetch result");
            return result.map(|value| state.entries.get(key).cloned().or(value));
        }

        // A local write landed while the request was out; the response may
        // predate it, so the local value wins.
        if state.version(key) != started_version {
            if let (Ok(_), Some(current)) = (&result, state.entries.get(key)) {
                log::debug!(cache = self.config.name, key:? = key; "keeping newer local value");
                return Ok(Some(current.clone()));
            }
        }

        match &result {
            Ok(Some(value)) => {
                state.entries.insert(key.clone(), value.clone());
                state.touch(key);
                state.last_error = None;
                if let Some(on_fetched) = &self.on_fetched {
                    on_fetched(key, value);
                }
                drop(state);
                log::debug!(cache = self.config.name, key:? = key; "fetched");
                self.bump();
            }
            Ok(None) => {
                let removed = state.entries.remove(key).is_some();
                if removed {
                    state.touch(key);
                }
                drop(state);
                log::debug!(cache = self.config.name, key:? = key; "not found on server");
                if removed {
                    self.bump();
                }
            }
            Err(error) => {
                state.last_error = Some(error.clone());
                drop(state);
                log::warn!(cache = self.config.name, key:? = key, error:% = error; "fetch failed");
                self.bump();
            }
        }

        result
    }

    fn complete_many(
        &self,
        started: &HashMap<K, u64>,
        epoch: u64,
        flight_id: u64,
        result: Result<Vec<(K, V)>, CacheError>,
    ) -> Result<Arc<HashMap<K, V>>, CacheError> {
        let mut state = self.lock();
        if state.epoch != epoch {
            return Err(CacheError::Cleared);
        }
        let owned: HashSet<K> = started
            .keys()
            .filter(|key| state.finish_flight(key, flight_id))
            .cloned()
            .collect();

        match result {
            Ok(values) => {
                let mut values: HashMap<K, V> = values.into_iter().collect();
                for (key, value) in values.iter_mut() {
                    let unchanged = owned.contains(key)
                        && started.get(key).copied() == Some(state.version(key));
                    match state.entries.get(key) {
                        Some(current) if !unchanged => *value = current.clone(),
                        _ if !owned.contains(key) => {}
                        _ => {
                            state.entries.insert(key.clone(), value.clone());
                            state.touch(key);
                            if let Some(on_fetched) = &self.on_fetched {
                                on_fetched(key, value);
                            }
                        }
                    }
                }
                state.last_error = None;
                drop(state);
                log::debug!(cache = self.config.name, requested = started.len(), found = values.len(); "bulk fetched");
                self.bump();
                Ok(Arc::new(values))
            }
            Err(error) => {
                state.last_error = Some(error.clone());
                drop(state);
                log::warn!(cache = self.config.name, requested = started.len(), error:% = error; "bulk fetch failed");
                self.bump();
                Err(error)
            }
        }
    }
}

/// Keyed, process-lifetime cache with fetch-on-miss. Cloning yields another
/// handle to the same cache.
pub struct EntityCache<K: CacheKey, V: CacheValue> {
    inner: Arc<Inner<K, V>>,
}

impl<K: CacheKey, V: CacheValue> Clone for EntityCache<K, V> {
    fn clone(&self) -> Self {
        EntityCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, V: CacheValue> EntityCache<K, V> {
    pub fn new(fetcher: Arc<dyn EntityFetcher<K, V>>, config: CacheConfig) -> Self {
        Self::build(fetcher, config, None)
    }

    /// Like [`EntityCache::new`], but `on_fetched` sees every value a fetch
    /// stores, e.g. to seed a per-entity cache from a list response. It runs
    /// under this cache's lock, so a concurrent `clear` either drops the
    /// result or runs after the hook. The hook must not call back into this
    /// cache.
    pub fn with_hook(
        fetcher: Arc<dyn EntityFetcher<K, V>>,
        config: CacheConfig,
        on_fetched: impl Fn(&K, &V) + Send + Sync + 'static,
    ) -> Self {
        let on_fetched: FetchHook<K, V> = Box::new(on_fetched);
        Self::build(fetcher, config, Some(on_fetched))
    }

    fn build(
        fetcher: Arc<dyn EntityFetcher<K, V>>,
        config: CacheConfig,
        on_fetched: Option<FetchHook<K, V>>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        EntityCache {
            inner: Arc::new(Inner {
                config,
                fetcher,
                on_fetched,
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_flight: 0,
                    versions: HashMap::new(),
                    pending_writes: HashSet::new(),
                    epoch: 0,
                    last_error: None,
                }),
                revision,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.config.name
    }

    /// Cached value, if any. A miss schedules a background fetch unless one
    /// is already running for `key`. Must be called inside a Tokio runtime.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.inner.lock();
        if let Some(value) = state.entries.get(key) {
            return Some(value.clone());
        }
        let _ = self.flight(&mut state, key);
        None
    }

    /// Cached value without triggering a fetch.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn is_fetching(&self, key: &K) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value, or the result of the (possibly already running) fetch.
    pub async fn ensure(&self, key: &K) -> Result<Option<V>, CacheError> {
        let flight = {
            let mut state = self.inner.lock();
            if let Some(value) = state.entries.get(key) {
                return Ok(Some(value.clone()));
            }
            self.flight(&mut state, key)
        };
        flight.await
    }

    /// Joins the running request for `key`, or starts one. A request that
    /// started before the latest local write to `key` is not joined: its
    /// response may not reflect that write, so a new request replaces it.
    fn flight(&self, state: &mut State<K, V>, key: &K) -> FetchFuture<V> {
        let started_version = state.version(key);
        if let Some(existing) = state.in_flight.get(key) {
            if existing.started_version == started_version {
                return existing.future.clone();
            }
            log::debug!(cache = self.inner.config.name, key:? = key; "superseding fetch that predates a local write");
        }

        state.next_flight += 1;
        let flight_id = state.next_flight;
        let inner = Arc::clone(&self.inner);
        let epoch = state.epoch;
        let owned_key = key.clone();
        let future = async move {
            let timeout = inner.config.fetch_timeout;
            let result = match tokio::time::timeout(timeout, inner.fetcher.fetch(&owned_key)).await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(CacheError::from(error)),
                Err(_) => Err(CacheError::Timeout(timeout)),
            };
            inner.complete(&owned_key, epoch, flight_id, started_version, result)
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            key.clone(),
            Flight {
                id: flight_id,
                started_version,
                future: future.clone(),
            },
        );
        log::debug!(cache = self.inner.config.name, key:? = key; "fetch scheduled");
        // Drives the fetch to completion even if no caller awaits it.
        tokio::spawn(future.clone());
        future
    }

    /// Populates several keys with one bulk request. Keys already cached or
    /// being fetched are skipped; callers deduplicate their input.
    pub async fn fetch_many(&self, keys: &[K]) {
        let bulk: BulkFuture<K, V> = {
            let mut state = self.inner.lock();
            let missing: Vec<K> = keys
                .iter()
                .filter(|key| {
                    !state.entries.contains_key(*key) && !state.in_flight.contains_key(*key)
                })
                .cloned()
                .collect();

            if missing.is_empty() {
                return;
            }

            state.next_flight += 1;
            let flight_id = state.next_flight;
            let inner = Arc::clone(&self.inner);
            let epoch = state.epoch;
            let requested = missing.clone();
            let started: HashMap<K, u64> = missing
                .iter()
                .map(|key| (key.clone(), state.version(key)))
                .collect();
            let bulk = async move {
                let timeout = inner.config.fetch_timeout;
                let result =
                    match tokio::time::timeout(timeout, inner.fetcher.fetch_many(&requested)).await
                    {
                        Ok(Ok(values)) => Ok(values),
                        Ok(Err(error)) => Err(CacheError::from(error)),
                        Err(_) => Err(CacheError::Timeout(timeout)),
                    };
                inner.complete_many(&started, epoch, flight_id, result)
            }
            .boxed()
            .shared();

            for key in missing {
                let lookup = key.clone();
                let per_key = bulk
                    .clone()
                    .map(move |result| result.map(|values| values.get(&lookup).cloned()))
                    .boxed()
                    .shared();
                let started_version = state.version(&key);
                state.in_flight.insert(
                    key,
                    Flight {
                        id: flight_id,
                        started_version,
                        future: per_key,
                    },
                );
            }

            tokio::spawn(bulk.clone());
            bulk
        };

        // Failures are recorded in `last_error` by `complete_many`.
        let _ = bulk.await;
    }

    /// Refetches `key` even if cached. The current value stays readable until
    /// the response replaces it.
    pub async fn refresh(&self, key: &K) -> Result<Option<V>, CacheError> {
        let flight = {
            let mut state = self.inner.lock();
            self.flight(&mut state, key)
        };
        flight.await
    }

    /// Background variant of [`EntityCache::refresh`].
    pub fn revalidate(&self, key: &K) {
        let mut state = self.inner.lock();
        let _ = self.flight(&mut state, key);
    }

    /// Seeds an entry from a list response.
    pub fn insert(&self, key: K, value: V) {
        {
            let mut state = self.inner.lock();
            state.touch(&key);
            state.entries.insert(key, value);
        }
        self.inner.bump();
    }

    pub fn insert_many(&self, values: impl IntoIterator<Item = (K, V)>) {
        {
            let mut state = self.inner.lock();
            for (key, value) in values {
                state.touch(&key);
                state.entries.insert(key, value);
            }
        }
        self.inner.bump();
    }

    /// Patches an existing entry in place. Returns `false` when absent.
    pub fn update(&self, key: &K, patch: impl FnOnce(&mut V)) -> bool {
        let updated = {
            let mut state = self.inner.lock();
            match state.entries.get_mut(key) {
                Some(value) => {
                    patch(value);
                    state.touch(key);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.inner.bump();
        }
        updated
    }

    /// Drops one entry; the next `get` refetches it.
    pub fn invalidate(&self, key: &K) {
        let removed = {
            let mut state = self.inner.lock();
            state.touch(key);
            state.entries.remove(key).is_some()
        };
        if removed {
            log::debug!(cache = self.inner.config.name, key:? = key; "invalidated");
            self.inner.bump();
        }
    }

    /// Drops everything, including fetches and writes still in flight.
    pub fn clear(&self) {
        {
            let mut state = self.inner.lock();
            state.entries.clear();
            state.in_flight.clear();
            state.versions.clear();
            state.pending_writes.clear();
            state.last_error = None;
            state.epoch += 1;
        }
        log::debug!(cache = self.inner.config.name; "cleared");
        self.inner.bump();
    }

    /// Applies `patch` to the entry immediately. The patch sees `None` for an
    /// absent entry and may insert, modify or remove it.
    pub fn mutate_optimistic(
        &self,
        key: K,
        patch: impl FnOnce(&mut Option<V>),
    ) -> PendingWrite<K, V> {
        let write = {
            let mut state = self.inner.lock();
            let previous = state.entries.remove(&key);
            let mut current = previous.clone();
            patch(&mut current);
            if let Some(value) = current {
                state.entries.insert(key.clone(), value);
            }
            let version = state.touch(&key);
            let id = Uuid::new_v4();
            state.pending_writes.insert(id);

            PendingWrite {
                id,
                key,
                previous,
                version,
                epoch: state.epoch,
            }
        };
        log::debug!(cache = self.inner.config.name, key:? = write.key, write:% = write.id; "optimistic write applied");
        self.inner.bump();
        write
    }

    /// Marks a write as accepted by the server. The local value stays.
    pub fn confirm(&self, write: PendingWrite<K, V>) -> WriteOutcome {
        let mut state = self.inner.lock();
        if state.epoch != write.epoch {
            return WriteOutcome::Discarded;
        }
        state.pending_writes.remove(&write.id);
        WriteOutcome::Confirmed
    }

    /// Restores the value the entry had before `write`. If the entry has been
    /// written again since, the entry is invalidated instead so a stale
    /// snapshot never overwrites newer data.
    pub fn rollback(&self, write: PendingWrite<K, V>) -> WriteOutcome {
        let outcome = {
            let mut state = self.inner.lock();
            if state.epoch != write.epoch {
                return WriteOutcome::Discarded;
            }
            state.pending_writes.remove(&write.id);

            if state.version(&write.key) == write.version {
                match write.previous {
                    Some(previous) => {
                        state.entries.insert(write.key.clone(), previous);
                    }
                    None => {
                        state.entries.remove(&write.key);
                    }
                }
                state.touch(&write.key);
                WriteOutcome::RolledBack
            } else {
                state.entries.remove(&write.key);
                state.touch(&write.key);
                WriteOutcome::Invalidated
            }
        };
        log::warn!(cache = self.inner.config.name, key:? = write.key, write:% = write.id, outcome:? = outcome; "optimistic write reverted");
        self.inner.bump();
        outcome
    }

    /// Full optimistic cycle: patch locally, run `remote`, then confirm on
    /// success or roll back and hand the error to the caller.
    pub async fn apply_optimistic<R, E, F>(
        &self,
        key: K,
        patch: impl FnOnce(&mut Option<V>),
        remote: F,
    ) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        E: Display,
    {
        let write = self.mutate_optimistic(key, patch);
        match remote.await {
            Ok(value) => {
                self.confirm(write);
                Ok(value)
            }
            Err(error) => {
                log::warn!(cache = self.inner.config.name, key:? = write.key, error:% = error; "server rejected optimistic write");
                self.rollback(write);
                Err(error)
            }
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.lock().pending_writes.len()
    }

    /// Most recent read-path failure, cleared by the next successful fetch.
    pub fn last_error(&self) -> Option<CacheError> {
        self.inner.lock().last_error.clone()
    }

    /// Receives a new revision number after every change to the cache.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.lock().entries.values().cloned().collect()
    }
}

/// Adapts an async closure into an [`EntityFetcher`].
pub struct FnFetcher<F> {
    fetch: F,
}

impl<F> FnFetcher<F> {
    pub fn new(fetch: F) -> Self {
        FnFetcher { fetch }
    }
}

#[async_trait]
impl<K, V, F> EntityFetcher<K, V> for FnFetcher<F>
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(K) -> BoxFuture<'static, Result<Option<V>, ApiError>> + Send + Sync,
{
    async fn fetch(&self, key: &K) -> Result<Option<V>, ApiError> {
        (self.fetch)(key.clone()).await
    }
}
