use crate::protocol::{Request, Response};
use crate::server::codec;
use catalog::{Product, ProductDraft, ProductId, ProductsList};
use futures::{SinkExt, StreamExt};
use shared::{Error, Result};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Client for the framed product RPC protocol. One request in flight at a time.
pub struct RpcClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl RpcClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to connect: {}", e)))?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            framed: Framed::new(stream, codec()),
        })
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        let encoded = request.encode().map_err(Error::Internal)?;
        self.framed
            .send(encoded)
            .await
            .map_err(|e| Error::Internal(format!("Failed to send request: {}", e)))?;

        let frame = self
            .framed
            .next()
            .await
            .ok_or_else(|| Error::Internal("Connection closed by server".to_string()))?
            .map_err(|e| Error::Internal(format!("Failed to read response: {}", e)))?;

        Response::decode(frame.freeze()).map_err(Error::Internal)
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.call(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(into_error(other)),
        }
    }

    pub async fn create_product(&mut self, product: ProductDraft) -> Result<Product> {
        self.expect_product(&Request::CreateProduct { product }).await
    }

    pub async fn update_product(&mut self, id: &ProductId, product: ProductDraft) -> Result<Product> {
        self.expect_product(&Request::UpdateProduct {
            id: id.clone(),
            product,
        })
        .await
    }

    pub async fn get_product(&mut self, id: &ProductId) -> Result<Product> {
        self.expect_product(&Request::GetProductById { id: id.clone() })
            .await
    }

    pub async fn search_products(
        &mut self,
        query: &str,
        page: Option<u32>,
        size: Option<u32>,
    ) -> Result<ProductsList> {
        let request = Request::SearchProducts {
            query: query.to_string(),
            page,
            size,
        };
        match self.call(&request).await? {
            Response::Products { list } => Ok(list),
            other => Err(into_error(other)),
        }
    }

    async fn expect_product(&mut self, request: &Request) -> Result<Product> {
        match self.call(request).await? {
            Response::Product { product } => Ok(product),
            other => Err(into_error(other)),
        }
    }
}

fn into_error(response: Response) -> Error {
    match response {
        Response::NotFound { id } => Error::NotFound(id),
        Response::Invalid { msg } => Error::Validation(msg),
        Response::Error { msg } => Error::Internal(msg),
        other => Error::Internal(format!("Unexpected response: {:?}", other)),
    }
}
