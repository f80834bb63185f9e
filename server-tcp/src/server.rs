use crate::protocol::{Request, Response};
use catalog::{Pagination, ProductOperations};
use futures::{SinkExt, StreamExt};
use shared::Error;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub type ConnectionError = Box<dyn std::error::Error + Send + Sync>;

/// Build a length-delimited codec with a 4-byte big-endian length prefix.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(8 * 1024 * 1024)
        .new_codec()
}

/// Accept connections until `shutdown` fires, then stop accepting and wait
/// for open connections to finish their in-flight request.
pub async fn serve(
    listener: TcpListener,
    products: Arc<dyn ProductOperations>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let tracker = TaskTracker::new();

    loop {
        let (socket, addr) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let products = products.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            debug!("Connection {addr} accepted.");
            if let Err(err) = process_connection(socket, products, shutdown).await {
                warn!("Connection {addr} error: {err:?}");
            }
        });
    }

    // Closing the listener refuses new connections while open ones drain.
    drop(listener);
    tracker.close();
    info!(open_connections = tracker.len(), "RPC listener stopped, draining connections");
    tracker.wait().await;
    Ok(())
}

pub async fn process_connection(
    socket: TcpStream,
    products: Arc<dyn ProductOperations>,
    shutdown: CancellationToken,
) -> Result<(), ConnectionError> {
    socket.set_nodelay(true).ok();

    let mut framed = Framed::new(socket, codec());

    loop {
        // Shutdown is only observed between requests, so a request that was
        // read is always answered.
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = framed.next() => match frame {
                Some(frame) => frame?,
                None => break,
            },
        };

        let response = match Request::decode(frame.freeze()) {
            Ok(request) => {
                debug!("Received request: {:?}", request);
                handle(request, products.as_ref()).await
            }
            Err(e) => {
                error!("Failed to decode request: {}", e);
                Response::Invalid { msg: e }
            }
        };

        let encoded = match response.encode() {
            Ok(encoded) => encoded,
            Err(e) => Response::Error { msg: e }.encode()?,
        };
        framed.send(encoded).await?;
    }

    Ok(())
}

async fn handle(request: Request, products: &dyn ProductOperations) -> Response {
    let result = match request {
        Request::Ping => return Response::Pong,
        Request::CreateProduct { product } => products
            .create(product)
            .await
            .map(|product| Response::Product { product }),
        Request::UpdateProduct { id, product } => products
            .update(&id, product)
            .await
            .map(|product| Response::Product { product }),
        Request::GetProductById { id } => products
            .get_by_id(&id)
            .await
            .map(|product| Response::Product { product }),
        Request::SearchProducts { query, page, size } => products
            .search(&query, Pagination::new(page, size))
            .await
            .map(|list| Response::Products { list }),
    };

    result.unwrap_or_else(|e| match e {
        Error::NotFound(id) => Response::NotFound { id },
        Error::Validation(msg) => Response::Invalid { msg },
        other => Response::Error {
            msg: other.to_string(),
        },
    })
}
