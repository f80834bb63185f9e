pub mod api;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export key types
pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
