use catalog::ProductOperations;
use std::sync::Arc;

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub products: Arc<dyn ProductOperations>,
}

impl AppState {
    pub fn new(products: Arc<dyn ProductOperations>) -> Self {
        Self { products }
    }
}
