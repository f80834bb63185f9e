use async_trait::async_trait;
use catalog::ports::ProductCache;
use catalog::{Product, ProductId};
use moka::Expiry;
use moka::future::Cache;
use shared::Result;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone)]
struct CachedProduct {
    product: Product,
    ttl: Duration,
}

/// Expires every entry after the TTL it was inserted with.
struct PerEntryTtl;

impl Expiry<ProductId, CachedProduct> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &ProductId,
        value: &CachedProduct,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &ProductId,
        value: &CachedProduct,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-based product cache with per-entry TTL and a capacity bound.
/// Lock-free and safe to share across tasks.
pub struct MokaProductCache {
    cache: Cache<ProductId, CachedProduct>,
}

impl MokaProductCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .name("products")
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and expirations.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl ProductCache for MokaProductCache {
    async fn get(&self, id: &ProductId) -> Result<Option<Product>> {
        // Expired entries are never returned, even before eviction runs.
        Ok(self.cache.get(id).await.map(|cached| cached.product))
    }

    async fn set(&self, id: &ProductId, product: Product, ttl: Duration) -> Result<()> {
        debug!(product_id = %id, version = product.version, ttl_ms = ttl.as_millis() as u64, "Caching product");
        self.cache
            .insert(id.clone(), CachedProduct { product, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, id: &ProductId) -> Result<()> {
        self.cache.invalidate(id).await;
        Ok(())
    }
}

impl Debug for MokaProductCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaProductCache")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::ProductDraft;
    use tokio::time::sleep;

    const LONG: Duration = Duration::from_secs(60);

    fn product(id: &str, name: &str) -> Product {
        Product::new(ProductId::from(id), ProductDraft::named(name), chrono::Utc::now())
    }

    #[tokio::test]
    async fn test_moka_cache_set_and_get() {
        let cache = MokaProductCache::new(100);
        let id = ProductId::from("p1");

        cache.set(&id, product("p1", "Lamp"), LONG).await.unwrap();

        let cached = cache.get(&id).await.unwrap().unwrap();
        assert_eq!(cached.name, "Lamp");
    }

    #[tokio::test]
    async fn test_moka_cache_get_nonexistent() {
        let cache = MokaProductCache::new(100);

        let result = cache.get(&ProductId::from("nonexistent")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_moka_cache_delete() {
        let cache = MokaProductCache::new(100);
        let id = ProductId::from("p1");
        cache.set(&id, product("p1", "Lamp"), LONG).await.unwrap();

        cache.delete(&id).await.unwrap();
        assert!(cache.get(&id).await.unwrap().is_none());

        // Deleting an absent entry is not an error.
        cache.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_moka_cache_overwrite() {
        let cache = MokaProductCache::new(100);
        let id = ProductId::from("p1");

        cache.set(&id, product("p1", "Lamp"), LONG).await.unwrap();
        cache.set(&id, product("p1", "Desk Lamp"), LONG).await.unwrap();

        assert_eq!(cache.get(&id).await.unwrap().unwrap().name, "Desk Lamp");
    }

    #[tokio::test]
    async fn test_moka_cache_per_entry_ttl() {
        let cache = MokaProductCache::new(100);
        let short = ProductId::from("short");
        let long = ProductId::from("long");

        cache.set(&short, product("short", "A"), Duration::from_millis(100)).await.unwrap();
        cache.set(&long, product("long", "B"), LONG).await.unwrap();
        assert!(cache.get(&short).await.unwrap().is_some());

        sleep(Duration::from_millis(200)).await;

        assert!(cache.get(&short).await.unwrap().is_none());
        assert!(cache.get(&long).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_moka_cache_update_resets_ttl() {
        let cache = MokaProductCache::new(100);
        let id = ProductId::from("p1");

        cache.set(&id, product("p1", "A"), Duration::from_millis(100)).await.unwrap();
        cache.set(&id, product("p1", "B"), LONG).await.unwrap();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.get(&id).await.unwrap().unwrap().name, "B");
    }

    #[tokio::test]
    async fn test_moka_cache_bounded() {
        let cache = MokaProductCache::new(2);

        for i in 0..5 {
            let id = format!("p{i}");
            cache.set(&ProductId::from(id.as_str()), product(&id, "Lamp"), LONG).await.unwrap();
        }
        cache.run_pending_tasks().await;

        assert!(cache.entry_count() <= 2, "Cache should have at most 2 entries");
    }
}
