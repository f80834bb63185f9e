#![deny(clippy::all)]

use crate::domain::{Product, ProductDraft, ProductId};
use crate::events::DomainEvent;
use async_trait::async_trait;
use shared::Result;
use std::time::Duration;

// Ports are the pluggable boundaries to the durable store, the cache and the event bus

/// Port for the durable store (source of truth)
#[async_trait]
pub trait ProductRepository: Send + Sync + 'static {
    async fn find(&self, id: &ProductId) -> Result<Option<Product>>;

    /// Insert a new record. Fails if the id is already taken.
    async fn insert(&self, product: Product) -> Result<ProductId>;

    /// Atomically replace the record, bumping its version.
    /// Returns `None` when no record exists for `id`.
    async fn replace(&self, id: &ProductId, draft: ProductDraft) -> Result<Option<Product>>;

    /// Filtered page plus the total number of matches.
    async fn search(&self, filter: &str, offset: usize, limit: usize)
    -> Result<(Vec<Product>, u64)>;

    /// Reachability probe used at startup.
    async fn ping(&self) -> Result<()>;
}

/// Port for the volatile read-through cache
#[async_trait]
pub trait ProductCache: Send + Sync + 'static {
    async fn get(&self, id: &ProductId) -> Result<Option<Product>>;
    async fn set(&self, id: &ProductId, product: Product, ttl: Duration) -> Result<()>;
    async fn delete(&self, id: &ProductId) -> Result<()>;
}

pub type Offset = u64;

#[derive(Clone, Debug)]
pub struct Delivery {
    pub partition: u32,
    pub offset: Offset,
    pub event: DomainEvent,
}

/// One partition of a consumer-group subscription.
#[async_trait]
pub trait PartitionReader: Send + 'static {
    fn partition(&self) -> u32;

    /// Wait for the next event after the reader's position.
    /// Dropping the returned future never loses an event.
    async fn next(&mut self) -> Result<Delivery>;

    /// Record that everything up to and including `offset` is processed.
    async fn commit(&mut self, offset: Offset) -> Result<()>;
}

/// Port for the ordered, partitioned, at-least-once event log
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    fn partition_count(&self) -> u32;

    async fn append(&self, partition_key: &str, event: &DomainEvent) -> Result<Offset>;

    /// One reader per partition, positioned at the group's committed offset.
    async fn subscribe(&self, group_id: &str) -> Result<Vec<Box<dyn PartitionReader>>>;

    async fn dead_letter(&self, group_id: &str, delivery: &Delivery, reason: &str) -> Result<()>;
}
