use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use catalog::persistence::{SledEventLog, SledProductRepository};
use catalog::{EventPublisher, ProductStore, PublisherOptions, StoreSettings};
use serde_json::{json, Value};
use server_http::{build_router, AppState};
use std::sync::Arc;
use storage_engine::MokaProductCache;
use tower::ServiceExt;

fn app() -> Router {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let repository = Arc::new(SledProductRepository::open(&db).unwrap());
    let bus = Arc::new(SledEventLog::open(&db, 2).unwrap());
    let publisher = Arc::new(EventPublisher::start(bus, PublisherOptions::default()));
    let store = ProductStore::new(
        repository,
        Arc::new(MokaProductCache::new(1_000)),
        publisher,
        StoreSettings::default(),
    );
    build_router(AppState::new(Arc::new(store)), &["*".to_string()])
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_check() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "OK");
}

#[tokio::test]
async fn test_create_get_update_product() {
    let app = app();

    let (status, created) = send(
        &app,
        "POST",
        "/products",
        Some(json!({"id": "p1", "name": "A", "category": "lighting", "price": 12.5})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "p1");
    assert_eq!(created["version"], 1);

    let (status, fetched) = send(&app, "GET", "/products/p1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "A");

    let (status, updated) = send(&app, "PUT", "/products/p1", Some(json!({"name": "B"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["version"], 2);

    let (status, fetched) = send(&app, "GET", "/products/p1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "B");
    assert_eq!(fetched["id"], "p1");
}

#[tokio::test]
async fn test_create_assigns_id_when_absent() {
    let app = app();

    let (status, created) = send(&app, "POST", "/products", Some(json!({"name": "Lamp"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let id = created["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let (status, fetched) = send(&app, "GET", &format!("/products/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Lamp");
}

#[tokio::test]
async fn test_missing_product_is_not_found() {
    let app = app();

    let (status, body) = send(&app, "GET", "/products/p2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("p2"));

    let (status, _) = send(&app, "PUT", "/products/p2", Some(json!({"name": "B"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_payloads_are_rejected() {
    let app = app();

    let (status, body) = send(&app, "POST", "/products", Some(json!({"name": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/products",
        Some(json!({"name": "Lamp", "price": -1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/products")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_id_is_a_server_error() {
    let app = app();
    let body = json!({"id": "p1", "name": "A"});

    let (status, _) = send(&app, "POST", "/products", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&app, "POST", "/products", Some(body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_search_pages_are_bounded_and_disjoint() {
    let app = app();
    for i in 0..12 {
        let (status, _) = send(
            &app,
            "POST",
            "/products",
            Some(json!({"id": format!("lamp-{i:02}"), "name": "Desk Lamp"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    send(&app, "POST", "/products", Some(json!({"id": "chair", "name": "Chair"}))).await;

    let (status, first) = send(&app, "GET", "/products/search?q=lamp&page=1&size=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["total_count"], 12);
    assert_eq!(first["total_pages"], 3);
    assert_eq!(first["has_more"], true);

    let (_, second) = send(&app, "GET", "/products/search?q=lamp&page=2&size=5", None).await;
    let ids = |page: &Value| -> Vec<String> {
        page["products"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect()
    };
    let first_ids = ids(&first);
    let second_ids = ids(&second);
    assert_eq!(first_ids.len(), 5);
    assert_eq!(second_ids.len(), 5);
    assert!(first_ids.iter().all(|id| !second_ids.contains(id)));

    let (status, empty) = send(&app, "GET", "/products/search?q=sofa", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty["total_count"], 0);
    assert_eq!(empty["products"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_versioned_prefix_serves_same_routes() {
    let app = app();

    let (status, _) = send(&app, "POST", "/api/v1/products", Some(json!({"id": "p1", "name": "A"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, fetched) = send(&app, "GET", "/api/v1/products/p1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "A");

    let (status, _) = send(&app, "GET", "/products/p1", None).await;
    assert_eq!(status, StatusCode::OK);
}
