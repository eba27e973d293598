use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CacheEntry<V> {
    data: V,
    expiration: Instant,
}

/// In-memory memoization with a time-to-live per entry
///
/// Expired entries are dropped lazily, when they are next read.
pub struct Cached<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> Default for Cached<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<K, V> Cached<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return a live entry, evicting it if it expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.expiration <= now);
        if removed.is_some() {
            tracing::debug!("Cache entry expired");
            return None;
        }
        self.entries.get(key).map(|entry| entry.data.clone())
    }

    pub fn insert(&self, key: K, data: V) {
        self.entries.insert(
            key,
            CacheEntry {
                data,
                expiration: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(data) = self.get(&key) {
            tracing::trace!("Returning cached data");
            return data;
        }
        let data = compute();
        self.insert(key, data.clone());
        data
    }

    /// Like [`Cached::get_or_insert_with`] for async computations. Failures
    /// are returned and not cached.
    pub async fn get_or_try_insert_with_async<F, Fut, E>(
        &self,
        key: K,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(data) = self.get(&key) {
            tracing::trace!("Returning cached data");
            return Ok(data);
        }
        let data = compute().await?;
        self.insert(key, data.clone());
        Ok(data)
    }

    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.data)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
