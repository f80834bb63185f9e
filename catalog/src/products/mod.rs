mod operation;
mod store;

pub use operation::ProductOperations;
pub use store::{ProductStore, StoreSettings};
