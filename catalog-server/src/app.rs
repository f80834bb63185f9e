//! Wires the durable store, cache, bus, publisher and consumers into an
//! [`Orchestrator`] with every listener registered.

use crate::lifecycle::Orchestrator;
use crate::metrics_http::{build_metrics_router, MetricsState};
use crate::subsystems::{ConsumerSubsystem, HttpSubsystem, RpcSubsystem};
use catalog::consumer::{AuditTrail, CacheWarmer, ConsumerGroup, EventHandler, HandlerChain};
use catalog::persistence::{SledEventLog, SledProductRepository};
use catalog::ports::ProductRepository;
use catalog::{
    EventPublisher, Health, ProductStore, PublisherOptions, RetryPolicy, StoreSettings,
};
use server_http::{build_router, AppState};
use shared::config::Config;
use shared::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use storage_engine::MokaProductCache;
use tracing::{error, info, warn};

pub struct App {
    pub orchestrator: Orchestrator,
    pub store: Arc<ProductStore>,
    pub publisher: Arc<EventPublisher>,
    pub health: Arc<Health>,
    pub db: sled::Db,
}

pub async fn build(config: &Config) -> Result<App> {
    let path = Path::new(&config.data_dir).join("catalog.sled");
    info!("Opening sled database at {}", path.display());
    let db = sled::open(&path)
        .map_err(|e| Error::Startup(format!("failed to open {}: {}", path.display(), e)))?;

    let repository = Arc::new(SledProductRepository::open(&db)?);
    repository
        .ping()
        .await
        .map_err(|e| Error::Startup(format!("durable store unreachable: {}", e)))?;

    let bus = Arc::new(SledEventLog::open(&db, config.bus_partitions)?);
    let cache = Arc::new(MokaProductCache::new(config.cache.max_entries));
    let publisher = Arc::new(EventPublisher::start(
        bus.clone(),
        PublisherOptions::from(&config.publisher),
    ));

    let store = Arc::new(ProductStore::new(
        repository,
        cache,
        publisher.clone(),
        StoreSettings {
            cache_ttl: config.cache.ttl,
            call_timeout: config.call_timeout,
            ..StoreSettings::default()
        },
    ));

    let health = Arc::new(Health::new(config.consumer.stall_threshold));

    let handlers: Vec<Arc<dyn EventHandler>> = vec![
        Arc::new(CacheWarmer::new(store.clone())),
        Arc::new(AuditTrail::open(&db)?),
    ];
    let consumer = ConsumerGroup::new(
        config.consumer.group_id.clone(),
        bus,
        Arc::new(HandlerChain::new(handlers)),
        RetryPolicy::new(
            config.consumer.max_attempts,
            config.consumer.initial_backoff,
            config.consumer.max_backoff,
        ),
        health.clone(),
    );

    let mut orchestrator = Orchestrator::new(health.clone(), config.drain_deadline);
    orchestrator
        .register(HttpSubsystem::new(
            "http",
            config.http_addr(),
            build_router(AppState::new(store.clone()), &config.allowed_origins),
        ))
        .register(RpcSubsystem::new(config.rpc_addr(), store.clone()))
        .register(HttpSubsystem::new(
            "metrics",
            config.metrics_addr(),
            build_metrics_router(MetricsState {
                health: health.clone(),
                publisher: publisher.clone(),
            }),
        ))
        .register(ConsumerSubsystem::new(consumer));

    let flush_publisher = publisher.clone();
    let flush_deadline = config.publisher.flush_deadline;
    orchestrator.on_drain("publisher", async move {
        let abandoned = flush_publisher.shutdown(flush_deadline).await;
        if abandoned > 0 {
            warn!(abandoned, "Publisher abandoned queued events");
        }
    });

    let flush_db = db.clone();
    orchestrator.on_drain("sled", async move {
        if let Err(e) = flush_db.flush_async().await {
            error!("Failed to flush sled database: {}", e);
        }
    });

    Ok(App {
        orchestrator,
        store,
        publisher,
        health,
        db,
    })
}
