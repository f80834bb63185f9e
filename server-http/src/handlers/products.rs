use crate::api::{ProductRequest, ProductResponse, ProductsPageResponse, SearchParams};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use catalog::ProductId;
use tracing::info;

/// POST /products
pub async fn create_product(
    State(state): State<AppState>,
    payload: Result<Json<ProductRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let Json(req) = payload?;
    info!("CREATE: name={}", req.name);

    let product = state.products.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// PUT /products/{id}
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ProductRequest>, JsonRejection>,
) -> Result<Json<ProductResponse>, ApiError> {
    let Json(req) = payload?;
    info!("UPDATE: id={}", id);

    let product = state.products.update(&ProductId::from(id), req.into()).await?;
    Ok(Json(product.into()))
}

/// GET /products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    info!("GET: id={}", id);

    let product = state.products.get_by_id(&ProductId::from(id)).await?;
    Ok(Json(product.into()))
}

/// GET /products/search?q=&page=&size=
pub async fn search_products(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ProductsPageResponse>, ApiError> {
    info!("SEARCH: q={}, page={:?}, size={:?}", params.q, params.page, params.size);

    let list = state
        .products
        .search(&params.q, params.pagination())
        .await?;
    Ok(Json(list.into()))
}
