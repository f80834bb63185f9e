use crate::lifecycle::Subsystem;
use async_trait::async_trait;
use axum::Router;
use catalog::consumer::ConsumerGroup;
use catalog::ports::PartitionReader;
use catalog::ProductOperations;
use shared::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

async fn bind(name: &str, addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Startup(format!("{} failed to bind {}: {}", name, addr, e)))
}

/// An axum router served on its own listener. Used for the product API and
/// for the health and metrics endpoints.
pub struct HttpSubsystem {
    name: &'static str,
    addr: String,
    listener: Option<TcpListener>,
    router: Router,
}

impl HttpSubsystem {
    pub fn new(name: &'static str, addr: impl Into<String>, router: Router) -> Self {
        Self {
            name,
            addr: addr.into(),
            listener: None,
            router,
        }
    }

    /// Serve on an already bound listener.
    pub fn with_listener(name: &'static str, listener: TcpListener, router: Router) -> Self {
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        Self {
            name,
            addr,
            listener: Some(listener),
            router,
        }
    }
}

#[async_trait]
impl Subsystem for HttpSubsystem {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.listener = Some(bind(self.name, &self.addr).await?);
        }
        info!("{} listening on http://{}", self.name, self.addr);
        Ok(())
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let this = *self;
        let listener = this
            .listener
            .ok_or_else(|| Error::Internal(format!("{} was not started", this.name)))?;

        // Stops accepting on cancel and waits for open requests to finish.
        axum::serve(listener, this.router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| Error::Internal(format!("{} server error: {}", this.name, e)))?;

        info!("{} shut down gracefully", this.name);
        Ok(())
    }
}

/// The framed product RPC listener.
pub struct RpcSubsystem {
    addr: String,
    listener: Option<TcpListener>,
    products: Arc<dyn ProductOperations>,
}

impl RpcSubsystem {
    pub fn new(addr: impl Into<String>, products: Arc<dyn ProductOperations>) -> Self {
        Self {
            addr: addr.into(),
            listener: None,
            products,
        }
    }

    pub fn with_listener(listener: TcpListener, products: Arc<dyn ProductOperations>) -> Self {
        let addr = listener
            .local_addr()
            .map(|a: SocketAddr| a.to_string())
            .unwrap_or_default();
        Self {
            addr,
            listener: Some(listener),
            products,
        }
    }
}

#[async_trait]
impl Subsystem for RpcSubsystem {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.listener = Some(bind("rpc", &self.addr).await?);
        }
        info!("RPC server listening on tcp://{}", self.addr);
        Ok(())
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let this = *self;
        let listener = this
            .listener
            .ok_or_else(|| Error::Internal("rpc was not started".to_string()))?;

        server_tcp::serve(listener, this.products, shutdown)
            .await
            .map_err(|e| Error::Internal(format!("rpc server error: {}", e)))?;

        info!("RPC server shut down gracefully");
        Ok(())
    }
}

/// One consumer group; joins the bus on start, one worker per partition.
pub struct ConsumerSubsystem {
    group: ConsumerGroup,
    readers: Vec<Box<dyn PartitionReader>>,
}

impl ConsumerSubsystem {
    pub fn new(group: ConsumerGroup) -> Self {
        Self {
            group,
            readers: Vec::new(),
        }
    }
}

#[async_trait]
impl Subsystem for ConsumerSubsystem {
    fn name(&self) -> &'static str {
        "consumer"
    }

    async fn start(&mut self) -> Result<()> {
        self.readers = self.group.subscribe().await.map_err(|e| {
            Error::Startup(format!(
                "consumer group {} failed to subscribe: {}",
                self.group.group_id(),
                e
            ))
        })?;
        info!(
            group_id = self.group.group_id(),
            partitions = self.readers.len(),
            "Consumer group joined"
        );
        Ok(())
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let this = *self;
        this.group.run(this.readers, shutdown).await
    }
}
