//! Consumer group: one worker per bus partition, commit after success,
//! dead-letter on handler exhaustion.

mod handlers;

pub use handlers::{AuditTrail, CacheWarmer, HandlerChain};

use crate::events::DomainEvent;
use crate::health::Health;
use crate::ports::{Delivery, EventBus, PartitionReader};
use crate::retry::RetryPolicy;
use crate::telemetry::{METRIC_DEAD_LETTERS, METRIC_EVENTS_CONSUMED, METRIC_HANDLER_RETRIES};
use async_trait::async_trait;
use metrics::counter;
use shared::{Error, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Reacts to a domain event. Must be idempotent: the same
/// `(product_id, sequence)` may be delivered more than once.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

pub struct ConsumerGroup {
    group_id: String,
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    retry: RetryPolicy,
    health: Arc<Health>,
}

impl ConsumerGroup {
    pub fn new(
        group_id: impl Into<String>,
        bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        retry: RetryPolicy,
        health: Arc<Health>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            bus,
            handler,
            retry,
            health,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Join the group: one reader per partition at the committed offset.
    pub async fn subscribe(&self) -> Result<Vec<Box<dyn PartitionReader>>> {
        let readers = self.bus.subscribe(&self.group_id).await?;
        info!(
            group_id = %self.group_id,
            partitions = readers.len(),
            handler = self.handler.name(),
            "Consumer group subscribed"
        );
        Ok(readers)
    }

    /// Run one worker per reader until `shutdown` fires or a worker fails.
    /// The first failure stops the sibling workers and is returned.
    pub async fn run(
        &self,
        readers: Vec<Box<dyn PartitionReader>>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let stop = shutdown.child_token();
        let mut workers = JoinSet::new();

        for reader in readers {
            let worker = PartitionWorker {
                group_id: self.group_id.clone(),
                bus: self.bus.clone(),
                handler: self.handler.clone(),
                retry: self.retry.clone(),
                health: self.health.clone(),
                reader,
            };
            workers.spawn(worker.run(stop.clone()));
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .map_err(|e| Error::Internal(format!("partition worker panicked: {}", e)))
                .and_then(|result| result);

            if let Err(e) = outcome {
                if failure.is_none() {
                    error!(group_id = %self.group_id, error = %e, "Partition worker failed, stopping group");
                    stop.cancel();
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct PartitionWorker {
    group_id: String,
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    retry: RetryPolicy,
    health: Arc<Health>,
    reader: Box<dyn PartitionReader>,
}

impl PartitionWorker {
    async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let partition = self.reader.partition();
        debug!(group_id = %self.group_id, partition, "Partition worker started");

        loop {
            // Shutdown is only observed between events; an in-flight event
            // always runs to commit.
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.reader.next() => next?,
            };
            self.process(delivery).await?;
        }

        debug!(group_id = %self.group_id, partition, "Partition worker stopped");
        Ok(())
    }

    async fn process(&mut self, delivery: Delivery) -> Result<()> {
        self.health.begin(delivery.partition, delivery.offset);

        let handler = &self.handler;
        let event = &delivery.event;
        let mut attempt = 0u32;
        let handled = self
            .retry
            .run(handler.name(), || {
                attempt += 1;
                if attempt > 1 {
                    counter!(METRIC_HANDLER_RETRIES).increment(1);
                }
                handler.handle(event)
            })
            .await;

        let dead_lettered = match handled {
            Ok(()) => false,
            Err(e) => {
                error!(
                    group_id = %self.group_id,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    product_id = %delivery.event.product_id,
                    sequence = delivery.event.sequence,
                    error = %e,
                    "Handler exhausted retries, dead-lettering event"
                );
                self.bus
                    .dead_letter(&self.group_id, &delivery, &e.to_string())
                    .await?;
                counter!(METRIC_DEAD_LETTERS).increment(1);
                true
            }
        };

        self.reader.commit(delivery.offset).await?;
        self.health
            .finish(delivery.partition, delivery.offset, dead_lettered);
        counter!(METRIC_EVENTS_CONSUMED).increment(1);
        Ok(())
    }
}
