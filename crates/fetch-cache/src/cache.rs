use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use moka::Expiry;
use moka::future::Cache;
use tokio::task::JoinHandle;

use crate::policy::{CachePolicy, TtlClass};

/// A stored value together with the moment it was inserted and its lifetime.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Expires every entry according to the TTL it was stored with.
struct PerEntryTtl;

impl<V> Expiry<String, Arc<CacheEntry<V>>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry<V>>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry<V>>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Raised to every waiter when a shared fill ends without an outcome, which
/// happens only if the fill panicked or the runtime is shutting down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fetch for {key} ended without producing a result")]
pub struct InitAbandoned {
    pub key: String,
}

type Pending<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

/// Fills currently running, by key.
type InFlight<V, E> = Arc<Mutex<HashMap<String, Pending<V, E>>>>;

/// Removes a key from the in-flight table once its fill task is done,
/// including when the task unwinds.
struct InFlightGuard<V, E> {
    in_flight: InFlight<V, E>,
    key: String,
}

impl<V, E> Drop for InFlightGuard<V, E> {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared fetch cache keyed by canonical request URL.
///
/// `E` is the error a fill may fail with. Cloning is cheap; all clones
/// address the same storage. Construct one at process start and hand clones
/// to whoever needs it.
pub struct FetchCache<V, E> {
    inner: Cache<String, Arc<CacheEntry<V>>>,
    in_flight: InFlight<V, E>,
    policy: CachePolicy,
}

impl<V, E> Clone for FetchCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            in_flight: Arc::clone(&self.in_flight),
            policy: self.policy.clone(),
        }
    }
}

impl<V, E> FetchCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: From<InitAbandoned> + Send + Sync + 'static,
{
    pub fn new(policy: CachePolicy) -> Self {
        let inner = Cache::builder()
            .max_capacity(policy.max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            inner,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Returns the live value stored under `key`.
    ///
    /// An entry past its TTL is treated as absent and evicted on the spot.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entry = self.inner.get(key).await?;
        if entry.is_expired() {
            self.inner.invalidate(key).await;
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.inner
            .insert(key.into(), Arc::new(CacheEntry::new(value, ttl)))
            .await;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// Approximate number of live entries.
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fills currently running.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Returns the cached value for `key`, running `init` on a miss.
    ///
    /// `init` runs on its own task, owned by the cache rather than by the
    /// caller, so dropping a waiter never cancels it. Concurrent calls for
    /// the same key while it is outstanding do not start their own `init`;
    /// they wait and receive the same value or the same error. `init` decides
    /// which [`TtlClass`] the value is stored under. Errors are never cached,
    /// so the next call after a failure starts over.
    pub async fn get_or_try_insert_with<F>(&self, key: &str, init: F) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<(V, TtlClass), E>> + Send + 'static,
    {
        let mut rechecked = false;
        loop {
            if let Some(value) = self.get(key).await {
                return Ok(value);
            }

            let pending = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(key) {
                    Some(pending) => pending.clone(),
                    // A fill finished between the lookup and the lock.
                    None if !rechecked && self.inner.contains_key(key) => {
                        rechecked = true;
                        continue;
                    }
                    None => {
                        let pending = self.spawn_fill(key.to_string(), init);
                        in_flight.insert(key.to_string(), pending.clone());
                        pending
                    }
                }
            };
            return pending.await;
        }
    }

    fn spawn_fill<F>(&self, key: String, init: F) -> Pending<V, E>
    where
        F: Future<Output = Result<(V, TtlClass), E>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let policy = self.policy.clone();
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
        };

        let task = tokio::spawn(async move {
            let (value, class) = init.await.map_err(Arc::new)?;
            let entry = Arc::new(CacheEntry::new(value.clone(), policy.ttl_for(class)));
            inner.insert(guard.key.clone(), entry).await;
            drop(guard);
            Ok(value)
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(%key, %err, "cache fill task failed");
                    Err(Arc::new(E::from(InitAbandoned { key })))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Spawns a task that periodically drives eviction of expired entries.
    ///
    /// Lookups already ignore expired entries; the sweep only reclaims memory.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                inner.run_pending_tasks().await;
                tracing::trace!(entries = inner.entry_count(), "fetch cache swept");
            }
        })
    }
}
