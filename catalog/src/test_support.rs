//! In-memory doubles shared by the unit tests.

use crate::domain::{Product, ProductDraft, ProductId};
use crate::events::DomainEvent;
use crate::ports::{Delivery, EventBus, Offset, PartitionReader, ProductCache, ProductRepository};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use shared::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn temp_db() -> sled::Db {
    sled::Config::new().temporary(true).open().unwrap()
}

pub fn draft(name: &str) -> ProductDraft {
    ProductDraft {
        id: None,
        name: name.to_string(),
        category: "general".to_string(),
        description: format!("{name} description"),
        price: 10.0,
    }
}

pub fn product(id: &str, name: &str) -> Product {
    Product::new(ProductId::from(id), draft(name), Utc::now())
}

/// Cache double whose operations can be switched to fail.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<ProductId, Product>,
    failing: AtomicBool,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryCache {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn peek(&self, id: &str) -> Option<Product> {
        self.entries.get(&ProductId::from(id)).map(|e| e.value().clone())
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Cache("cache unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProductCache for MemoryCache {
    async fn get(&self, id: &ProductId) -> Result<Option<Product>> {
        self.check()?;
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }

    async fn set(&self, id: &ProductId, product: Product, _ttl: Duration) -> Result<()> {
        self.check()?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(id.clone(), product);
        Ok(())
    }

    async fn delete(&self, id: &ProductId) -> Result<()> {
        self.check()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(id);
        Ok(())
    }
}

/// Repository wrapper counting durable round trips, with switchable failures.
pub struct CountingRepository<R> {
    inner: R,
    pub finds: AtomicUsize,
    pub fail_reads: AtomicUsize,
    pub fail_writes: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl<R: ProductRepository> CountingRepository<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            finds: AtomicUsize::new(0),
            fail_reads: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            read_delay: Mutex::new(None),
        }
    }

    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// Fail the next `n` reads with a transient error.
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Hold every read result back for `delay` before returning it.
    pub fn delay_reads(&self, delay: Option<Duration>) {
        *self.read_delay.lock().unwrap() = delay;
    }

    fn write_check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::StoreWrite("disk full".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<R: ProductRepository> ProductRepository for CountingRepository<R> {
    async fn find(&self, id: &ProductId) -> Result<Option<Product>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::StoreRead("replica lagging".into()));
        }
        let found = self.inner.find(id).await;
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        found
    }

    async fn insert(&self, product: Product) -> Result<ProductId> {
        self.write_check()?;
        self.inner.insert(product).await
    }

    async fn replace(&self, id: &ProductId, draft: ProductDraft) -> Result<Option<Product>> {
        self.write_check()?;
        self.inner.replace(id, draft).await
    }

    async fn search(
        &self,
        filter: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Product>, u64)> {
        self.inner.search(filter, offset, limit).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Bus double that records appends in memory and can be told to fail.
#[derive(Default)]
pub struct RecordingBus {
    pub appended: Mutex<Vec<DomainEvent>>,
    pub failures_left: AtomicUsize,
    pub always_fail: AtomicBool,
    pub append_delay: Mutex<Option<Duration>>,
    pub attempts: AtomicUsize,
}

impl RecordingBus {
    pub fn failing() -> Self {
        let bus = Self::default();
        bus.always_fail.store(true, Ordering::SeqCst);
        bus
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.appended.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    fn partition_count(&self) -> u32 {
        1
    }

    async fn append(&self, _partition_key: &str, event: &DomainEvent) -> Result<Offset> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.append_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(Error::Bus("broker unreachable".into()));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Bus("broker unreachable".into()));
        }
        let mut appended = self.appended.lock().unwrap();
        appended.push(event.clone());
        Ok(appended.len() as Offset - 1)
    }

    async fn subscribe(&self, _group_id: &str) -> Result<Vec<Box<dyn PartitionReader>>> {
        Err(Error::Bus("subscribe unsupported".into()))
    }

    async fn dead_letter(&self, _group_id: &str, _delivery: &Delivery, _reason: &str) -> Result<()> {
        Ok(())
    }
}
