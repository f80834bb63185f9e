pub mod requests;
pub mod responses;

pub use requests::{ProductRequest, SearchParams};
pub use responses::{ErrorResponse, HealthResponse, ProductResponse, ProductsPageResponse};
