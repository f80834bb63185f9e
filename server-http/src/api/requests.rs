use catalog::{Pagination, ProductDraft, ProductId};
use serde::Deserialize;

/// Body of `POST /products` and `PUT /products/{id}`.
#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
}

impl From<ProductRequest> for ProductDraft {
    fn from(req: ProductRequest) -> Self {
        Self {
            id: req.id.map(ProductId::from),
            name: req.name,
            category: req.category,
            description: req.description,
            price: req.price,
        }
    }
}

/// Query string of `GET /products/search`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl SearchParams {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.size)
    }
}
