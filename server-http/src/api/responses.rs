use catalog::{Product, ProductsList};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub price: f64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.as_str().to_string(),
            name: product.name,
            category: product.category,
            description: product.description,
            price: product.price,
            version: product.version,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductsPageResponse {
    pub total_count: u64,
    pub total_pages: u64,
    pub page: u32,
    pub size: u32,
    pub has_more: bool,
    pub products: Vec<ProductResponse>,
}

impl From<ProductsList> for ProductsPageResponse {
    fn from(list: ProductsList) -> Self {
        Self {
            total_count: list.total_count,
            total_pages: list.total_pages,
            page: list.page,
            size: list.size,
            has_more: list.has_more,
            products: list.products.into_iter().map(ProductResponse::from).collect(),
        }
    }
}
