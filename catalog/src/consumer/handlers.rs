use crate::consumer::EventHandler;
use crate::domain::ProductId;
use crate::events::DomainEvent;
use crate::products::ProductStore;
use async_trait::async_trait;
use moka::sync::Cache;
use shared::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const APPLIED_IDLE: Duration = Duration::from_secs(3600);

/// Reconciles the cached entry for the event's product with the durable
/// store, repairing entries a slow reader populated after an update.
///
/// Sequences at or below the last one applied for a product are skipped, so
/// redelivery costs nothing. Forgetting a product only costs one extra
/// reconcile.
pub struct CacheWarmer {
    store: Arc<ProductStore>,
    applied: Cache<ProductId, u64>,
}

impl CacheWarmer {
    pub fn new(store: Arc<ProductStore>) -> Self {
        Self::with_capacity(store, 100_000)
    }

    pub fn with_capacity(store: Arc<ProductStore>, tracked_products: u64) -> Self {
        Self {
            store,
            applied: Cache::builder()
                .max_capacity(tracked_products)
                .time_to_idle(APPLIED_IDLE)
                .build(),
        }
    }

    /// Products whose last applied sequence is currently remembered.
    pub fn tracked_products(&self) -> u64 {
        self.applied.run_pending_tasks();
        self.applied.entry_count()
    }

    fn already_applied(&self, event: &DomainEvent) -> bool {
        self.applied
            .get(&event.product_id)
            .is_some_and(|last| last >= event.sequence)
    }

    // A product's events arrive on one partition, so no two calls race here.
    fn record(&self, event: &DomainEvent) {
        let last = self.applied.get(&event.product_id).unwrap_or(0);
        if event.sequence > last {
            self.applied.insert(event.product_id.clone(), event.sequence);
        }
    }
}

#[async_trait]
impl EventHandler for CacheWarmer {
    fn name(&self) -> &str {
        "cache_warmer"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        if self.already_applied(event) {
            debug!(
                product_id = %event.product_id,
                sequence = event.sequence,
                "Sequence already applied, skipping"
            );
            return Ok(());
        }

        self.store
            .reconcile(&event.product_id)
            .await
            .map_err(|e| Error::Handler(format!("cache reconcile failed: {}", e)))?;

        debug!(
            product_id = %event.product_id,
            sequence = event.sequence,
            "Cache reconciled"
        );
        self.record(event);
        Ok(())
    }
}

/// Append-only history of product events in sled, keyed by
/// `{product_id}/{sequence}`. The first write of a key wins.
pub struct AuditTrail {
    records: sled::Tree,
}

impl AuditTrail {
    pub const TREE: &'static str = "audit_trail";

    pub fn open(db: &sled::Db) -> Result<Self> {
        let records = db
            .open_tree(Self::TREE)
            .map_err(|e| Error::Startup(format!("Failed to open audit tree: {}", e)))?;
        Ok(Self { records })
    }

    /// Recorded events for a product, oldest sequence first.
    pub fn history(&self, id: &ProductId) -> Result<Vec<DomainEvent>> {
        let mut events = Vec::new();
        for result in self.records.scan_prefix(format!("{}/", id)) {
            let (_, value) = result?;
            events.push(serde_json::from_slice(&value)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventHandler for AuditTrail {
    fn name(&self) -> &str {
        "audit_trail"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        let key = format!("{}/{:020}", event.product_id, event.sequence);
        let value = serde_json::to_vec(event)
            .map_err(|e| Error::Handler(format!("Failed to serialize audit record: {}", e)))?;

        let recorded = self
            .records
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))
            .map_err(|e| Error::Handler(format!("Failed to write audit record: {}", e)))?;

        if recorded.is_err() {
            debug!(
                product_id = %event.product_id,
                sequence = event.sequence,
                "Audit record already present"
            );
        }
        Ok(())
    }
}

/// Runs handlers in order; the first failure fails the event. Every handler
/// in a chain must tolerate being re-run for the same event.
pub struct HandlerChain {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl EventHandler for HandlerChain {
    fn name(&self) -> &str {
        "handler_chain"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        for handler in &self.handlers {
            handler
                .handle(event)
                .await
                .map_err(|e| Error::Handler(format!("{}: {}", handler.name(), e)))?;
        }
        Ok(())
    }
}
