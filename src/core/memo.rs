//! Memoization of asynchronous lookups.
//!
//! [`MemoCache`] remembers the successful result of an asynchronous
//! operation under a string key so that later calls with the same key are
//! answered without running the operation again. Failures are never
//! remembered: the next call for the same key runs the operation afresh.
//!
//! [`memoize`] wraps any `Fn(A) -> impl Future<Output = Result<V, E>>` into
//! a [`Memoized`] operation with the same calling convention, given a
//! function deriving the cache key from the arguments.
//!
//! # Concurrent first use
//!
//! With [`InFlight::Coalesce`] (the default), concurrent calls for a key
//! that is not cached yet share one underlying call and all receive its
//! outcome. [`InFlight::Duplicate`] lets every such call run the operation
//! itself; the cached value is then whichever of them finishes last.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, trace};

/// Backing store for memoized values.
///
/// Implementations must be safe to share between tasks. `clear` empties the
/// store in place so every holder of the store observes the reset.
pub trait MemoStore<V>: Send + Sync {
    /// Return a copy of the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<V>;

    /// Store `value` under `key`, replacing any previous value.
    fn insert(&self, key: String, value: V);

    /// Remove every entry.
    fn clear(&self);

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`MemoStore`] backed by a mutex-guarded `HashMap`.
pub struct InMemoryStore<V> {
    entries: Mutex<HashMap<String, V>>,
}

impl<V> InMemoryStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Only the number of entries is shown; values may be key material.
impl<V> fmt::Debug for InMemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("entries", &lock(&self.entries).len())
            .finish()
    }
}

impl<V: Clone + Send> MemoStore<V> for InMemoryStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        lock(&self.entries).get(key).cloned()
    }

    fn insert(&self, key: String, value: V) {
        lock(&self.entries).insert(key, value);
    }

    fn clear(&self) {
        lock(&self.entries).clear();
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

/// How concurrent lookups for the same uncached key are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InFlight {
    /// Concurrent callers share a single underlying call.
    #[default]
    Coalesce,
    /// Every caller runs the underlying call itself.
    Duplicate,
}

type SharedLookup<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// A lookup that has been started but has not yet finished.
struct Pending<V, E> {
    id: u64,
    lookup: SharedLookup<V, E>,
}

/// Process-wide memo of asynchronous results, keyed by string.
pub struct MemoCache<V, E> {
    store: Arc<dyn MemoStore<V>>,
    in_flight: Arc<Mutex<HashMap<String, Pending<V, E>>>>,
    next_id: AtomicU64,
    mode: InFlight,
}

impl<V, E> MemoCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty cache backed by an [`InMemoryStore`].
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    /// Create a cache on top of an existing store.
    pub fn with_store(store: Arc<dyn MemoStore<V>>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            mode: InFlight::default(),
        }
    }

    /// Choose how concurrent lookups for the same key are handled.
    #[must_use]
    pub fn with_in_flight(mut self, mode: InFlight) -> Self {
        self.mode = mode;
        self
    }

    /// The configured in-flight mode.
    pub fn in_flight_mode(&self) -> InFlight {
        self.mode
    }

    /// Return the value cached under `key`, or run `fetch` to produce it.
    ///
    /// `fetch` is not called on a cache hit. A successful result is stored
    /// before it is returned; an error is returned and nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fetch` (or, when coalescing, the call this
    /// one joined) produced.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.store.get(key) {
            trace!(key, "memo cache hit");
            return Ok(value);
        }

        match self.mode {
            InFlight::Duplicate => {
                debug!(key, "memo cache miss");
                let value = fetch().await?;
                self.store.insert(key.to_string(), value.clone());
                Ok(value)
            }
            InFlight::Coalesce => self.join_or_start(key, fetch).await,
        }
    }

    async fn join_or_start<F, Fut>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let lookup = {
            let mut in_flight = lock(&self.in_flight);

            // A lookup may have finished between the first check and the lock.
            if let Some(value) = self.store.get(key) {
                trace!(key, "memo cache hit");
                return Ok(value);
            }

            match in_flight.get(key) {
                Some(pending) => {
                    debug!(key, "joining in-flight lookup");
                    pending.lookup.clone()
                }
                None => {
                    debug!(key, "memo cache miss");
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let lookup = self.track(key.to_string(), id, fetch());
                    in_flight.insert(
                        key.to_string(),
                        Pending {
                            id,
                            lookup: lookup.clone(),
                        },
                    );
                    lookup
                }
            }
        };

        lookup.await
    }

    /// Wrap `fetch` so that, once it completes, a success is stored and the
    /// in-flight entry is retired before any waiter sees the result.
    fn track<Fut>(&self, key: String, id: u64, fetch: Fut) -> SharedLookup<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let result = fetch.await;
            if let Ok(value) = &result {
                store.insert(key.clone(), value.clone());
            }

            let mut pending = lock(&in_flight);
            if pending.get(&key).is_some_and(|p| p.id == id) {
                pending.remove(&key);
            }
            drop(pending);

            result
        }
        .boxed()
        .shared()
    }

    /// Whether a value is cached under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.store.get(key).is_some()
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Forget every cached value and every in-flight lookup.
    ///
    /// The store is emptied in place. Lookups already running still record
    /// their result when they finish, but later callers no longer join them.
    pub fn clear(&self) {
        lock(&self.in_flight).clear();
        self.store.clear();
        debug!("memo cache cleared");
    }
}

impl<V, E> Default for MemoCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> fmt::Debug for MemoCache<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("entries", &self.store.len())
            .field("in_flight", &lock(&self.in_flight).len())
            .field("mode", &self.mode)
            .finish()
    }
}

type Operation<A, V, E> = dyn Fn(A) -> BoxFuture<'static, Result<V, E>> + Send + Sync;
type KeyFn<A> = dyn Fn(&A) -> String + Send + Sync;

/// An asynchronous operation whose successful results are memoized.
///
/// Created by [`memoize`] or [`Memoized::with_cache`].
pub struct Memoized<A, V, E> {
    operation: Arc<Operation<A, V, E>>,
    key_fn: Arc<KeyFn<A>>,
    cache: Arc<MemoCache<V, E>>,
}

/// Wrap `operation` so that results are cached under `key_fn(&args)`.
///
/// The wrapper gets its own empty [`MemoCache`]; use
/// [`Memoized::with_cache`] to share one.
pub fn memoize<A, V, E, Op, Fut, K>(operation: Op, key_fn: K) -> Memoized<A, V, E>
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    Op: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    K: Fn(&A) -> String + Send + Sync + 'static,
{
    Memoized::with_cache(operation, key_fn, Arc::new(MemoCache::new()))
}

impl<A, V, E> Memoized<A, V, E>
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Wrap `operation` on top of an existing, possibly shared, cache.
    pub fn with_cache<Op, Fut, K>(operation: Op, key_fn: K, cache: Arc<MemoCache<V, E>>) -> Self
    where
        Op: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self {
            operation: Arc::new(move |args: A| -> BoxFuture<'static, Result<V, E>> {
                operation(args).boxed()
            }),
            key_fn: Arc::new(key_fn),
            cache,
        }
    }

    /// Run the operation, or answer from the cache.
    ///
    /// # Errors
    ///
    /// Returns the error produced by the underlying operation.
    pub async fn call(&self, args: A) -> Result<V, E> {
        let key = (self.key_fn)(&args);
        let operation = Arc::clone(&self.operation);
        self.cache.get_or_fetch(&key, move || operation(args)).await
    }

    /// The cache backing this operation.
    pub fn cache(&self) -> &Arc<MemoCache<V, E>> {
        &self.cache
    }
}

impl<A, V, E> fmt::Debug for Memoized<A, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section here leaves the map in a valid state, so a
/// poisoned lock carries no torn data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
