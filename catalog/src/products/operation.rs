use crate::domain::{Pagination, Product, ProductDraft, ProductId, ProductsList};
use async_trait::async_trait;
use shared::Result;

/// Product use cases exposed to the front ends.
#[async_trait]
pub trait ProductOperations: Send + Sync + 'static {
    async fn create(&self, draft: ProductDraft) -> Result<Product>;

    /// Full replacement of an existing product.
    async fn update(&self, id: &ProductId, draft: ProductDraft) -> Result<Product>;

    async fn get_by_id(&self, id: &ProductId) -> Result<Product>;

    async fn search(&self, query: &str, pagination: Pagination) -> Result<ProductsList>;
}
