use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Build and configure the application router. Product routes are served
/// both at the root and under `/api/v1`.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .merge(product_routes())
        .nest("/api/v1", product_routes())
        // Middleware
        .layer(build_cors_layer(allowed_origins))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/products", post(handlers::create_product))
        .route("/products/search", get(handlers::search_products))
        .route(
            "/products/{id}",
            get(handlers::get_product).put(handlers::update_product),
        )
}

/// An empty list or a `*` entry allows any origin.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}
