//! TTL and size bounded cache shared by the currency, channel and forecast
//! lookups.

use moka::future::Cache;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    name: &'static str,
    inner: Arc<Cache<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            name,
            inner: Arc::new(cache),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let hit = self.inner.get(key).await;
        if hit.is_some() {
            tracing::debug!(cache = self.name, ?key, "Cache hit");
        }
        hit
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Cached value unless `bypass` is set, else the loader's result (which is
    /// then cached)
    pub async fn get_or_load<E, F, Fut>(&self, key: K, bypass: bool, load: F) -> Result<V, E>
    where
        K: Clone,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if !bypass {
            if let Some(value) = self.get(&key).await {
                return Ok(value);
            }
        }
        let value = load().await?;
        self.inner.insert(key, value.clone()).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bypass_reloads_and_refreshes() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 10, Duration::from_secs(60));

        let first: Result<u32, ()> = cache.get_or_load("k".to_string(), false, || async { Ok(1) }).await;
        assert_eq!(first, Ok(1));

        let cached: Result<u32, ()> = cache.get_or_load("k".to_string(), false, || async { Ok(2) }).await;
        assert_eq!(cached, Ok(1));

        let bypassed: Result<u32, ()> = cache.get_or_load("k".to_string(), true, || async { Ok(3) }).await;
        assert_eq!(bypassed, Ok(3));
        assert_eq!(cache.get(&"k".to_string()).await, Some(3));
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let cache: TtlCache<String, u32> = TtlCache::new("test", 10, Duration::from_secs(60));
        cache.insert("k".to_string(), 7).await;
        cache.invalidate(&"k".to_string()).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
    }
}
