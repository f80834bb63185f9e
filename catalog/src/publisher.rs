//! Bounded, retrying fan-out of domain events to the event bus.

use crate::domain::ProductId;
use crate::events::DomainEvent;
use crate::ports::EventBus;
use crate::retry::RetryPolicy;
use crate::telemetry::{
    METRIC_EVENTS_DROPPED, METRIC_EVENTS_OVERFLOW, METRIC_EVENTS_PUBLISHED,
    METRIC_PUBLISHER_BACKLOG,
};
use metrics::{counter, gauge};
use moka::sync::Cache;
use shared::config::PublisherSettings;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Products whose last sequence is forgotten after this long without events.
/// A forgotten product restarts from its durable version.
const SEQUENCE_IDLE: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug)]
pub struct PublisherOptions {
    /// Total queued events across all lanes.
    pub queue_capacity: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
    /// How long `publish` waits for room in a full lane before dropping.
    pub overflow_timeout: Duration,
    /// Upper bound on products whose last sequence is remembered.
    pub tracked_products: u64,
}

impl From<&PublisherSettings> for PublisherOptions {
    fn from(settings: &PublisherSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            workers: settings.workers,
            retry: RetryPolicy::new(
                settings.max_attempts,
                settings.initial_backoff,
                settings.max_backoff,
            ),
            overflow_timeout: settings.overflow_timeout,
            ..Self::default()
        }
    }
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
            retry: RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(5)),
            overflow_timeout: Duration::from_millis(500),
            tracked_products: 100_000,
        }
    }
}

struct Lane {
    tx: mpsc::Sender<DomainEvent>,
    /// Held from stamping until the event is queued, so sequence order is
    /// queue order for every product on the lane.
    gate: tokio::sync::Mutex<()>,
}

/// Events for one product always travel through the same lane, so a single
/// worker appends them in enqueue order.
pub struct EventPublisher {
    lanes: Vec<Lane>,
    sequences: Cache<ProductId, u64>,
    pending: Arc<AtomicUsize>,
    closing: CancellationToken,
    overflow_timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventPublisher {
    /// Spawn the lane workers. Must be called from within a Tokio runtime.
    pub fn start(bus: Arc<dyn EventBus>, options: PublisherOptions) -> Self {
        let lane_count = options.workers.max(1);
        let lane_capacity = (options.queue_capacity / lane_count).max(1);
        let pending = Arc::new(AtomicUsize::new(0));
        let closing = CancellationToken::new();

        let mut lanes = Vec::with_capacity(lane_count);
        let mut workers = Vec::with_capacity(lane_count);
        for lane in 0..lane_count {
            let (tx, rx) = mpsc::channel(lane_capacity);
            lanes.push(Lane {
                tx,
                gate: tokio::sync::Mutex::new(()),
            });
            workers.push(tokio::spawn(run_lane(
                lane,
                rx,
                bus.clone(),
                options.retry.clone(),
                pending.clone(),
                closing.clone(),
            )));
        }

        info!(lanes = lane_count, lane_capacity, "Event publisher started");

        Self {
            lanes,
            sequences: Cache::builder()
                .max_capacity(options.tracked_products)
                .time_to_idle(SEQUENCE_IDLE)
                .build(),
            pending,
            closing,
            overflow_timeout: options.overflow_timeout,
            workers: Mutex::new(workers),
        }
    }

    /// Hand an event to its lane. Never fails. A full lane makes the caller
    /// wait up to the overflow timeout, after which the event is dropped.
    pub async fn publish(&self, mut event: DomainEvent) {
        if self.closing.is_cancelled() {
            warn!(product_id = %event.product_id, "Publisher is shut down, dropping event");
            counter!(METRIC_EVENTS_DROPPED).increment(1);
            return;
        }

        let lane = &self.lanes[self.lane_for(&event.product_id)];
        let _gate = lane.gate.lock().await;

        let last = self.sequences.get(&event.product_id).unwrap_or(0);
        event.sequence = (last + 1).max(event.product.version);
        self.sequences.insert(event.product_id.clone(), event.sequence);

        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = match lane.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                counter!(METRIC_EVENTS_OVERFLOW).increment(1);
                debug!(product_id = %event.product_id, "Publisher lane full, waiting for room");
                lane.tx
                    .send_timeout(event, self.overflow_timeout)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(event) => (event, "lane stayed full"),
                        SendTimeoutError::Closed(event) => (event, "lane closed"),
                    })
            }
            Err(TrySendError::Closed(event)) => Err((event, "lane closed")),
        };

        if let Err((event, reason)) = queued {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(
                product_id = %event.product_id,
                sequence = event.sequence,
                reason,
                "Dropping event"
            );
            counter!(METRIC_EVENTS_DROPPED).increment(1);
        }
        gauge!(METRIC_PUBLISHER_BACKLOG).set(self.backlog() as f64);
    }

    /// Events accepted but not yet appended or dropped.
    pub fn backlog(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Products whose last sequence is currently remembered.
    pub fn tracked_products(&self) -> u64 {
        self.sequences.run_pending_tasks();
        self.sequences.entry_count()
    }

    /// Stop accepting events, flush what is queued and abort lanes still busy
    /// at the deadline. Returns the number of abandoned events.
    pub async fn shutdown(&self, deadline: Duration) -> usize {
        self.closing.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        let abandoned = match tokio::time::timeout(deadline, futures::future::join_all(workers)).await
        {
            Ok(_) => self.backlog(),
            Err(_) => {
                for handle in abort_handles {
                    handle.abort();
                }
                self.pending.swap(0, Ordering::SeqCst)
            }
        };

        if abandoned > 0 {
            warn!(abandoned, "Publisher flush deadline exceeded, events abandoned");
            counter!(METRIC_EVENTS_DROPPED).increment(abandoned as u64);
        } else {
            info!("Publisher flushed");
        }
        gauge!(METRIC_PUBLISHER_BACKLOG).set(0.0);
        abandoned
    }

    fn lane_for(&self, id: &ProductId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }
}

async fn run_lane(
    lane: usize,
    mut rx: mpsc::Receiver<DomainEvent>,
    bus: Arc<dyn EventBus>,
    retry: RetryPolicy,
    pending: Arc<AtomicUsize>,
    closing: CancellationToken,
) {
    let mut draining = false;
    loop {
        tokio::select! {
            biased;
            _ = closing.cancelled(), if !draining => {
                // Refuse new events; everything already queued is still delivered.
                rx.close();
                draining = true;
            }
            next = rx.recv() => match next {
                Some(event) => {
                    deliver(bus.as_ref(), &retry, &event).await;
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
                None => break,
            },
        }
    }
    debug!(lane, "Publisher lane stopped");
}

async fn deliver(bus: &dyn EventBus, retry: &RetryPolicy, event: &DomainEvent) {
    match retry
        .run("publish_event", || bus.append(event.partition_key(), event))
        .await
    {
        Ok(offset) => {
            debug!(
                product_id = %event.product_id,
                kind = event.kind.as_str(),
                sequence = event.sequence,
                offset,
                "Event published"
            );
            counter!(METRIC_EVENTS_PUBLISHED).increment(1);
        }
        Err(e) => {
            error!(
                product_id = %event.product_id,
                kind = event.kind.as_str(),
                sequence = event.sequence,
                error = %e,
                "Event dropped after exhausting retries"
            );
            counter!(METRIC_EVENTS_DROPPED).increment(1);
        }
    }
}
