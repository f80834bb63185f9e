use crate::domain::{Pagination, Product, ProductDraft, ProductId, ProductsList};
use crate::events::DomainEvent;
use crate::ports::{ProductCache, ProductRepository};
use crate::products::operation::ProductOperations;
use crate::publisher::EventPublisher;
use crate::retry::RetryPolicy;
use crate::telemetry::{METRIC_CACHE_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
use crate::validation::{validate_draft, validate_id, validate_query, validate_replacement};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use shared::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub cache_ttl: Duration,
    /// Deadline for every single durable or cache call.
    pub call_timeout: Duration,
    /// Applied to durable reads on the cache-miss path.
    pub read_retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            call_timeout: Duration::from_secs(2),
            read_retry: RetryPolicy::new(2, Duration::from_millis(50), Duration::from_millis(500)),
        }
    }
}

/// Cache-aside product store.
///
/// Writes go to the durable store first and only ever invalidate the cache;
/// the cache is populated lazily by reads. The store keeps no mutable state
/// of its own, so clones are cheap and interchangeable.
#[derive(Clone)]
pub struct ProductStore {
    repository: Arc<dyn ProductRepository>,
    cache: Arc<dyn ProductCache>,
    publisher: Arc<EventPublisher>,
    settings: StoreSettings,
}

impl ProductStore {
    pub fn new(
        repository: Arc<dyn ProductRepository>,
        cache: Arc<dyn ProductCache>,
        publisher: Arc<EventPublisher>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            repository,
            cache,
            publisher,
            settings,
        }
    }

    /// Hand a Created event to the publisher. Never blocks the committed write.
    pub async fn publish_create(&self, product: Product) {
        self.publisher.publish(DomainEvent::created(product)).await;
    }

    /// Hand an Updated event to the publisher. Never blocks the committed write.
    pub async fn publish_update(&self, product: Product) {
        self.publisher.publish(DomainEvent::updated(product)).await;
    }

    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        call: F,
        on_timeout: fn(String) -> Error,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(format!(
                "{} timed out after {}ms",
                operation,
                self.settings.call_timeout.as_millis()
            ))),
        }
    }

    async fn find_durable(&self, id: &ProductId) -> Result<Option<Product>> {
        self.bounded("find", self.repository.find(id), Error::StoreRead)
            .await
            .map_err(|e| match e {
                Error::StoreRead(_) => e,
                other => Error::StoreRead(other.to_string()),
            })
    }

    async fn invalidate(&self, id: &ProductId) {
        if let Err(e) = self
            .bounded("cache_delete", self.cache.delete(id), Error::Cache)
            .await
        {
            warn!(product_id = %id, error = %e, "Cache invalidation failed");
            counter!(METRIC_CACHE_ERROR).increment(1);
        }
    }

    /// Returns whether the entry was written.
    async fn populate(&self, product: &Product) -> bool {
        let populated = self
            .bounded(
                "cache_set",
                self.cache
                    .set(&product.id, product.clone(), self.settings.cache_ttl),
                Error::Cache,
            )
            .await;
        match populated {
            Ok(()) => true,
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "Cache populate failed");
                counter!(METRIC_CACHE_ERROR).increment(1);
                false
            }
        }
    }

    /// An update may commit and invalidate between our durable read and the
    /// populate. Drop the entry we just wrote unless the store still holds
    /// the same version.
    async fn confirm_populated(&self, product: &Product) {
        match self.find_durable(&product.id).await {
            Ok(Some(current)) if current.version == product.version => {}
            Ok(current) => {
                debug!(
                    populated = product.version,
                    current = current.map(|p| p.version),
                    "Durable record moved on during populate, dropping entry"
                );
                self.invalidate(&product.id).await;
            }
            Err(e) => {
                warn!(error = %e, "Could not confirm populated entry, dropping it");
                self.invalidate(&product.id).await;
            }
        }
    }

    /// Bring the cached entry for `id` in line with the durable store. An
    /// entry older than the durable record is overwritten and an entry for a
    /// record that no longer exists is deleted. Absent entries stay absent.
    #[instrument(skip_all, fields(product_id = %id))]
    pub async fn reconcile(&self, id: &ProductId) -> Result<()> {
        let durable = self.find_durable(id).await?;

        let cached = match self
            .bounded("cache_get", self.cache.get(id), Error::Cache)
            .await
        {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Cache read failed during reconcile, invalidating");
                counter!(METRIC_CACHE_ERROR).increment(1);
                self.invalidate(id).await;
                return Ok(());
            }
        };

        match (cached, durable) {
            (Some(entry), Some(current)) if entry.version < current.version => {
                debug!(
                    cached = entry.version,
                    current = current.version,
                    "Replacing stale cache entry"
                );
                if self.populate(&current).await {
                    self.confirm_populated(&current).await;
                }
            }
            (Some(_), None) => {
                debug!("Cached product no longer stored, invalidating");
                self.invalidate(id).await;
            }
            _ => {}
        }
        Ok(())
    }
}

fn as_store_write(err: Error) -> Error {
    match err {
        Error::StoreWrite(_) => err,
        other => Error::StoreWrite(other.to_string()),
    }
}

#[async_trait]
impl ProductOperations for ProductStore {
    #[instrument(skip_all)]
    async fn create(&self, draft: ProductDraft) -> Result<Product> {
        validate_draft(&draft)?;

        let id = draft.id.clone().unwrap_or_else(ProductId::generate);
        let product = Product::new(id, draft, Utc::now());

        self.bounded(
            "insert",
            self.repository.insert(product.clone()),
            Error::StoreWrite,
        )
        .await
        .map_err(as_store_write)?;

        info!(product_id = %product.id, "Product created");
        self.publish_create(product.clone()).await;
        Ok(product)
    }

    #[instrument(skip_all, fields(product_id = %id))]
    async fn update(&self, id: &ProductId, draft: ProductDraft) -> Result<Product> {
        validate_replacement(id, &draft)?;

        let updated = self
            .bounded("replace", self.repository.replace(id, draft), Error::StoreWrite)
            .await
            .map_err(as_store_write)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        // Delete, never overwrite: the next read repopulates from the store.
        self.invalidate(id).await;

        info!(version = updated.version, "Product updated");
        self.publish_update(updated.clone()).await;
        Ok(updated)
    }

    #[instrument(skip_all, fields(product_id = %id))]
    async fn get_by_id(&self, id: &ProductId) -> Result<Product> {
        validate_id(id)?;

        match self
            .bounded("cache_get", self.cache.get(id), Error::Cache)
            .await
        {
            Ok(Some(product)) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                return Ok(product);
            }
            Ok(None) => {
                counter!(METRIC_CACHE_MISS).increment(1);
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed, falling back to durable store");
                counter!(METRIC_CACHE_ERROR).increment(1);
            }
        }

        let found = self
            .settings
            .read_retry
            .run_when(
                "find_product",
                |e| matches!(e, Error::StoreRead(_)),
                move || self.find_durable(id),
            )
            .await?;

        let Some(product) = found else {
            debug!("Product not found");
            return Err(Error::NotFound(id.to_string()));
        };

        if self.populate(&product).await {
            self.confirm_populated(&product).await;
        }
        Ok(product)
    }

    #[instrument(skip_all, fields(query = %query, page = pagination.page(), size = pagination.size()))]
    async fn search(&self, query: &str, pagination: Pagination) -> Result<ProductsList> {
        validate_query(query)?;

        let (products, total) = self
            .bounded(
                "search",
                self.repository
                    .search(query, pagination.offset(), pagination.limit()),
                Error::StoreRead,
            )
            .await?;

        Ok(ProductsList::new(products, total, &pagination))
    }
}

impl std::fmt::Debug for ProductStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductStore")
            .field("settings", &self.settings)
            .field("publisher_backlog", &self.publisher.backlog())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::persistence::SledProductRepository;
    use crate::publisher::PublisherOptions;
    use crate::test_support::{
        CountingRepository, MemoryCache, RecordingBus, draft, product, temp_db,
    };
    use std::sync::atomic::Ordering;

    struct Harness {
        store: ProductStore,
        repository: Arc<CountingRepository<SledProductRepository>>,
        cache: Arc<MemoryCache>,
        bus: Arc<RecordingBus>,
        publisher: Arc<EventPublisher>,
    }

    impl Harness {
        fn new() -> Self {
            let repository = Arc::new(CountingRepository::new(
                SledProductRepository::open(&temp_db()).unwrap(),
            ));
            let cache = Arc::new(MemoryCache::default());
            let bus = Arc::new(RecordingBus::default());
            let publisher = Arc::new(EventPublisher::start(
                bus.clone(),
                PublisherOptions {
                    retry: RetryPolicy::once(),
                    ..PublisherOptions::default()
                },
            ));
            let settings = StoreSettings {
                read_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)),
                ..StoreSettings::default()
            };
            let store = ProductStore::new(
                repository.clone(),
                cache.clone(),
                publisher.clone(),
                settings,
            );
            Self {
                store,
                repository,
                cache,
                bus,
                publisher,
            }
        }

        async fn published(&self) -> Vec<DomainEvent> {
            self.publisher.shutdown(Duration::from_secs(1)).await;
            self.bus.events()
        }
    }

    fn with_id(id: &str, name: &str) -> ProductDraft {
        ProductDraft {
            id: Some(ProductId::from(id)),
            ..draft(name)
        }
    }

    #[tokio::test]
    async fn test_create_get_update_scenario() {
        let h = Harness::new();

        let created = h.store.create(with_id("p1", "A")).await.unwrap();
        assert_eq!(created.id.as_str(), "p1");

        let fetched = h.store.get_by_id(&ProductId::from("p1")).await.unwrap();
        assert_eq!(fetched.name, "A");

        h.store
            .update(&ProductId::from("p1"), draft("B"))
            .await
            .unwrap();

        let fetched = h.store.get_by_id(&ProductId::from("p1")).await.unwrap();
        assert_eq!(fetched.id.as_str(), "p1");
        assert_eq!(fetched.name, "B");

        let missing = h.store.get_by_id(&ProductId::from("p2")).await;
        assert!(matches!(missing, Err(Error::NotFound(id)) if id == "p2"));

        let kinds: Vec<EventKind> = h.published().await.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Created, EventKind::Updated]);
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_leaves_cache_empty() {
        let h = Harness::new();

        let created = h.store.create(draft("Lamp")).await.unwrap();
        assert!(!created.id.as_str().is_empty());
        assert_eq!(created.version, 1);
        assert!(h.cache.peek(created.id.as_str()).is_none());

        let fetched = h.store.get_by_id(&created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_miss_populates_and_next_read_hits() {
        let h = Harness::new();
        let created = h.store.create(draft("Lamp")).await.unwrap();

        // One read to fill the entry, one to confirm it is still current.
        h.store.get_by_id(&created.id).await.unwrap();
        assert_eq!(h.repository.finds(), 2);
        assert!(h.cache.peek(created.id.as_str()).is_some());

        h.store.get_by_id(&created.id).await.unwrap();
        h.store.get_by_id(&created.id).await.unwrap();
        assert_eq!(h.repository.finds(), 2);
    }

    #[tokio::test]
    async fn test_update_invalidates_cache_entry() {
        let h = Harness::new();
        let created = h.store.create(draft("Lamp")).await.unwrap();
        h.store.get_by_id(&created.id).await.unwrap();

        let updated = h.store.update(&created.id, draft("Lamp v2")).await.unwrap();
        assert_eq!(updated.version, 2);
        assert!(h.cache.peek(created.id.as_str()).is_none());
        assert_eq!(h.cache.deletes.load(Ordering::SeqCst), 1);

        let fetched = h.store.get_by_id(&created.id).await.unwrap();
        assert_eq!(fetched.name, "Lamp v2");
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn test_update_missing_product_is_not_found() {
        let h = Harness::new();

        let result = h.store.update(&ProductId::from("ghost"), draft("X")).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(h.cache.deletes.load(Ordering::SeqCst), 0);
        assert!(h.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_mismatched_body_id() {
        let h = Harness::new();
        h.store.create(with_id("p1", "A")).await.unwrap();

        let result = h.store.update(&ProductId::from("p1"), with_id("p2", "B")).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_cache_failures_degrade_to_durable_store() {
        let h = Harness::new();
        let created = h.store.create(draft("Lamp")).await.unwrap();
        h.cache.set_failing(true);

        let first = h.store.get_by_id(&created.id).await.unwrap();
        let second = h.store.get_by_id(&created.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.repository.finds(), 2);

        let updated = h.store.update(&created.id, draft("Lamp v2")).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_durable_read_retried_once() {
        let h = Harness::new();
        let created = h.store.create(draft("Lamp")).await.unwrap();

        h.repository.fail_next_reads(1);
        let fetched = h.store.get_by_id(&created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(h.repository.finds(), 3);

        h.cache.set_failing(true);
        h.repository.fail_next_reads(2);
        let result = h.store.get_by_id(&created.id).await;
        assert!(matches!(result, Err(Error::StoreRead(_))));
    }

    #[tokio::test]
    async fn test_store_write_failure_touches_nothing() {
        let h = Harness::new();
        let existing = h.store.create(draft("Existing")).await.unwrap();
        h.store.get_by_id(&existing.id).await.unwrap();
        let sets_before = h.cache.sets.load(Ordering::SeqCst);

        h.repository.fail_writes.store(true, Ordering::SeqCst);
        let result = h.store.create(draft("Lamp")).await;

        assert!(matches!(result, Err(Error::StoreWrite(_))));
        assert_eq!(h.cache.sets.load(Ordering::SeqCst), sets_before);
        assert_eq!(h.cache.deletes.load(Ordering::SeqCst), 0);
        assert!(h.cache.peek(existing.id.as_str()).is_some());
        assert_eq!(h.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_store_write_error() {
        let h = Harness::new();
        h.store.create(with_id("p1", "A")).await.unwrap();

        let result = h.store.create(with_id("p1", "B")).await;
        assert!(matches!(result, Err(Error::StoreWrite(_))));
    }

    #[tokio::test]
    async fn test_invalid_draft_never_reaches_store() {
        let h = Harness::new();

        let result = h.store.create(draft("   ")).await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let listed = h.store.search("", Pagination::default()).await.unwrap();
        assert_eq!(listed.total_count, 0);
    }

    #[tokio::test]
    async fn test_search_pages_are_bounded_and_disjoint() {
        let h = Harness::new();
        for i in 0..25 {
            h.store
                .create(with_id(&format!("chair-{i:02}"), "Office Chair"))
                .await
                .unwrap();
        }
        h.store.create(draft("Desk")).await.unwrap();

        let mut seen = std::collections::HashSet::new();
        for page in 1..=3 {
            let listed = h
                .store
                .search("chair", Pagination::new(Some(page), Some(10)))
                .await
                .unwrap();
            assert_eq!(listed.total_count, 25);
            assert_eq!(listed.total_pages, 3);
            assert!(listed.products.len() <= 10);
            assert_eq!(listed.has_more, page < 3);
            for product in listed.products {
                assert!(seen.insert(product.id));
            }
        }
        assert_eq!(seen.len(), 25);

        let empty = h
            .store
            .search("sofa", Pagination::default())
            .await
            .unwrap();
        assert!(empty.products.is_empty());
        assert_eq!(empty.total_count, 0);
    }

    #[tokio::test]
    async fn test_search_bypasses_cache() {
        let h = Harness::new();
        h.store.create(draft("Lamp")).await.unwrap();
        h.cache.set_failing(true);

        let listed = h.store.search("lamp", Pagination::default()).await.unwrap();
        assert_eq!(listed.total_count, 1);
        assert_eq!(h.cache.sets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_racing_an_update_leaves_no_stale_entry() {
        let h = Harness::new();
        let created = h.store.create(with_id("p1", "v1")).await.unwrap();
        h.repository.delay_reads(Some(Duration::from_millis(100)));

        let reader = {
            let store = h.store.clone();
            let id = created.id.clone();
            tokio::spawn(async move { store.get_by_id(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let updated = h.store.update(&created.id, draft("v2")).await.unwrap();
        assert_eq!(updated.version, 2);

        // The reader started before the update, so it may return v1, but it
        // must not leave v1 behind in the cache.
        let raced = reader.await.unwrap().unwrap();
        assert_eq!(raced.version, 1);
        assert!(h.cache.peek("p1").is_none());

        h.repository.delay_reads(None);
        let fetched = h.store.get_by_id(&created.id).await.unwrap();
        assert_eq!(fetched.name, "v2");
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_older_entry() {
        let h = Harness::new();
        let created = h.store.create(with_id("p1", "v1")).await.unwrap();
        h.store.update(&created.id, draft("v2")).await.unwrap();
        h.cache
            .set(&created.id, created.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        h.store.reconcile(&created.id).await.unwrap();

        let cached = h.cache.peek("p1").unwrap();
        assert_eq!(cached.version, 2);
        assert_eq!(cached.name, "v2");
    }

    #[tokio::test]
    async fn test_reconcile_leaves_current_and_absent_entries_alone() {
        let h = Harness::new();
        let created = h.store.create(with_id("p1", "v1")).await.unwrap();

        h.store.reconcile(&created.id).await.unwrap();
        assert!(h.cache.peek("p1").is_none());

        h.store.get_by_id(&created.id).await.unwrap();
        let sets = h.cache.sets.load(Ordering::SeqCst);
        h.store.reconcile(&created.id).await.unwrap();
        assert_eq!(h.cache.sets.load(Ordering::SeqCst), sets);
        assert_eq!(h.cache.peek("p1").unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_reconcile_drops_entry_for_unknown_product() {
        let h = Harness::new();
        let ghost = product("ghost", "Lamp");
        h.cache
            .set(&ghost.id, ghost.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        h.store.reconcile(&ghost.id).await.unwrap();
        assert!(h.cache.peek("ghost").is_none());
    }

    #[tokio::test]
    async fn test_reconcile_surfaces_store_read_failures() {
        let h = Harness::new();
        h.repository.fail_next_reads(1);

        let result = h.store.reconcile(&ProductId::from("p1")).await;
        assert!(matches!(result, Err(Error::StoreRead(_))));
    }
}
