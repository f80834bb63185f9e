use crate::domain::{Product, ProductDraft, ProductId, search_tokens};
use crate::ports::ProductRepository;
use async_trait::async_trait;
use chrono::Utc;
use shared::{Error, Result};
use tracing::debug;

/// Sled-backed durable store for products, keyed by product id.
pub struct SledProductRepository {
    products: sled::Tree,
}

impl SledProductRepository {
    pub const TREE: &'static str = "products";

    pub fn open(db: &sled::Db) -> Result<Self> {
        let products = db
            .open_tree(Self::TREE)
            .map_err(|e| Error::Startup(format!("Failed to open products tree: {}", e)))?;
        Ok(Self { products })
    }

    fn decode(bytes: &[u8]) -> Result<Product> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::StoreRead(format!("Failed to deserialize product: {}", e)))
    }

    fn encode(product: &Product) -> Result<Vec<u8>> {
        serde_json::to_vec(product)
            .map_err(|e| Error::StoreWrite(format!("Failed to serialize product: {}", e)))
    }
}

#[async_trait]
impl ProductRepository for SledProductRepository {
    async fn find(&self, id: &ProductId) -> Result<Option<Product>> {
        let value = self
            .products
            .get(id.as_str())
            .map_err(|e| Error::StoreRead(format!("Failed to get product: {}", e)))?;

        match value {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, product: Product) -> Result<ProductId> {
        let value = Self::encode(&product)?;

        self.products
            .compare_and_swap(product.id.as_str(), None as Option<&[u8]>, Some(value))
            .map_err(|e| Error::StoreWrite(format!("Failed to insert product: {}", e)))?
            .map_err(|_| Error::StoreWrite(format!("product {} already exists", product.id)))?;

        Ok(product.id)
    }

    async fn replace(&self, id: &ProductId, draft: ProductDraft) -> Result<Option<Product>> {
        loop {
            let current = self
                .products
                .get(id.as_str())
                .map_err(|e| Error::StoreWrite(format!("Failed to read product: {}", e)))?;

            let Some(current) = current else {
                return Ok(None);
            };

            let next = Self::decode(&current)?.replaced_with(draft.clone(), Utc::now());
            let value = Self::encode(&next)?;

            let swapped = self
                .products
                .compare_and_swap(id.as_str(), Some(&current), Some(value))
                .map_err(|e| Error::StoreWrite(format!("Failed to replace product: {}", e)))?;

            match swapped {
                Ok(()) => return Ok(Some(next)),
                // Lost the race to a concurrent writer; re-read and apply on top.
                Err(_) => debug!(product_id = %id, "Concurrent replace detected, retrying"),
            }
        }
    }

    async fn search(
        &self,
        filter: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Product>, u64)> {
        let tokens = search_tokens(filter);
        let mut page = Vec::with_capacity(limit);
        let mut total = 0u64;

        for result in self.products.iter() {
            let (_, value) = result
                .map_err(|e| Error::StoreRead(format!("Failed to iterate products: {}", e)))?;

            let product = Self::decode(&value)?;
            if !product.matches(&tokens) {
                continue;
            }

            if total as usize >= offset && page.len() < limit {
                page.push(product);
            }
            total += 1;
        }

        Ok((page, total))
    }

    async fn ping(&self) -> Result<()> {
        self.products
            .first()
            .map(|_| ())
            .map_err(|e| Error::StoreRead(format!("Durable store unreachable: {}", e)))
    }
}
