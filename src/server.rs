//! Axum router construction.
//!
//! The [`app`] function wires the `/api/images` endpoints, the health,
//! metrics and OpenAPI endpoints, the `/objects` route of the memory
//! backend, and the optional static file fallback, and returns a
//! ready-to-serve [`axum::Router`].

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;

use crate::errors::{generate_request_id, REQUEST_ID_HEADER};
use crate::handlers::objects::{get_object, OBJECTS_ROUTE};
use crate::handlers::upload::upload_image;
use crate::handlers::view::view_image;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::spool::MULTIPART_OVERHEAD_BYTES;
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "picvault API",
        version = "0.1.0",
        description = "Image upload service with signed, time-limited access URLs"
    ),
    paths(
        health_check,
        crate::handlers::upload::upload_image,
        crate::handlers::view::view_image,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Images", description = "Upload and URL reissue"),
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`].
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let server = &state.config.server;
    let observability = &state.config.observability;

    let images = Router::new()
        .route("/upload", post(upload_image))
        .route("/view-image/:id", get(view_image));

    let mut router = Router::new()
        .nest("/api/images", images)
        .route("/openapi.json", get(openapi_json));

    if observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }
    if !state.local_buckets.is_empty() {
        router = router.route(&format!("{OBJECTS_ROUTE}/*path"), get(get_object));
    }
    if let Some(dir) = &server.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    let mut router = router
        .with_state(state.clone())
        // Applies to the multipart extractor; overruns surface as 413.
        .layer(DefaultBodyLimit::max(
            server.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        ))
        .layer(middleware::from_fn(common_headers_middleware));

    if server.cors_allow_any_origin {
        router = router.layer(CorsLayer::permissive());
    }

    router
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outermost (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless the error path already set one), `date`
/// and `server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("picvault"));

    response
}

// -- Health / OpenAPI --------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Service and metadata store reachable"),
        (status = 503, description = "Metadata store unreachable")
    )
)]
async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    match state.metadata.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response(),
        Err(e) => {
            warn!(error = %e, "Health check: metadata store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use bytes::Bytes;
    use chrono::Utc;
    use tower::ServiceExt;

    use crate::config::{Config, MemoryStorageConfig};
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::StorageBackend;

    const BOUNDARY: &str = "picvault-router-boundary";

    struct Harness {
        state: Arc<AppState>,
        storage: Arc<MemoryBackend>,
        compressed: Arc<MemoryBackend>,
        metadata: Arc<MemoryMetadataStore>,
        upload_dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(|_| {})
        }

        fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
            let upload_dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.storage.backend = "memory".to_string();
            config.metadata.engine = "memory".to_string();
            config.server.upload_dir = upload_dir.path().to_str().unwrap().to_string();
            adjust(&mut config);

            let storage = Arc::new(MemoryBackend::new(&MemoryStorageConfig::default()));
            let compressed = Arc::new(storage.with_bucket("picvault-compressed"));
            let metadata = Arc::new(MemoryMetadataStore::new());
            let state = Arc::new(AppState {
                config,
                metadata: metadata.clone(),
                storage: storage.clone(),
                compressed: Some(compressed.clone()),
                local_buckets: vec![storage.clone(), compressed.clone()],
            });
            Self {
                state,
                storage,
                compressed,
                metadata,
                upload_dir,
            }
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = app(self.state.clone()).oneshot(req).await.unwrap();
            let status = response.status();
            assert!(response.headers().contains_key(REQUEST_ID_HEADER));
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, json)
        }

        async fn upload(&self, field: &str, file_name: &str, data: &[u8]) -> (StatusCode, serde_json::Value) {
            self.send(upload_request(field, file_name, data)).await
        }

        async fn view(&self, id: &str) -> (StatusCode, serde_json::Value) {
            let req = Request::builder()
                .uri(format!("/api/images/view-image/{id}"))
                .body(Body::empty())
                .unwrap();
            self.send(req).await
        }

        async fn get(&self, url: &str) -> Response {
            let path = url.strip_prefix("http://localhost:3000").unwrap();
            let req = Request::builder().uri(path).body(Body::empty()).unwrap();
            app(self.state.clone()).oneshot(req).await.unwrap()
        }

        fn spooled_files(&self) -> usize {
            std::fs::read_dir(self.upload_dir.path()).unwrap().count()
        }
    }

    fn upload_request(field: &str, file_name: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/images/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_sanitizes_and_stores() {
        let h = Harness::new();
        let (status, json) = h.upload("image", "a b@c.png", b"0123456789").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["sizeMB"], "0.00");
        let file_id = json["fileId"].as_str().unwrap();
        assert_eq!(file_id.len(), 24);

        let url = json["fileUrl"].as_str().unwrap();
        let key = h.storage.resolve_url(url, Utc::now()).unwrap();
        assert!(key.starts_with("images/"));
        assert!(key.ends_with("-a_b_c.png"));

        let stored = h.storage.get(&key).await.unwrap();
        assert_eq!(stored.data, Bytes::from_static(b"0123456789"));
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(h.spooled_files(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_image_field() {
        let h = Harness::new();
        let (status, json) = h.upload("file", "x.png", b"data").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "No file uploaded"})
        );
        assert_eq!(h.storage.put_count(), 0);
        assert!(h.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_upload_then_view_round_trip() {
        let h = Harness::new();
        let (_, uploaded) = h.upload("image", "cat.png", b"meow").await;
        let file_id = uploaded["fileId"].as_str().unwrap();
        let upload_key = h
            .storage
            .resolve_url(uploaded["fileUrl"].as_str().unwrap(), Utc::now())
            .unwrap();

        let (status, json) = h.view(file_id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        let file = &json["file"];
        assert_eq!(file["id"], file_id);
        assert_eq!(file["fileName"], "cat.png");
        assert_eq!(file["storageKey"], upload_key.as_str());
        assert_eq!(file["contentType"], "image/png");
        assert_eq!(file["sizeBytes"], 4);
        assert_eq!(file["sizeMB"], "0.00");
        assert_eq!(file["createdAt"], file["updatedAt"]);
        assert!(file.get("compressedUrl").is_none());

        let fresh = file["accessUrl"].as_str().unwrap();
        assert_eq!(h.storage.resolve_url(fresh, Utc::now()).unwrap(), upload_key);
    }

    #[tokio::test]
    async fn test_two_reissues_resolve_to_same_key() {
        let h = Harness::new();
        let (_, uploaded) = h.upload("image", "dog.jpg", b"woof").await;
        let file_id = uploaded["fileId"].as_str().unwrap();

        let (_, first) = h.view(file_id).await;
        let (_, second) = h.view(file_id).await;
        let a = h
            .storage
            .resolve_url(first["file"]["accessUrl"].as_str().unwrap(), Utc::now())
            .unwrap();
        let b = h
            .storage
            .resolve_url(second["file"]["accessUrl"].as_str().unwrap(), Utc::now())
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_same_name_twice_gets_distinct_keys() {
        let h = Harness::new();
        let (_, first) = h.upload("image", "same.png", b"1").await;
        let (_, second) = h.upload("image", "same.png", b"2").await;

        let a = h
            .storage
            .resolve_url(first["fileUrl"].as_str().unwrap(), Utc::now())
            .unwrap();
        let b = h
            .storage
            .resolve_url(second["fileUrl"].as_str().unwrap(), Utc::now())
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(h.storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_view_unknown_id() {
        let h = Harness::new();
        let (status, json) = h.view("000000000000000000000000").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "File not found"})
        );
        assert_eq!(h.metadata.lookup_count(), 1);
        assert_eq!(h.storage.presign_count(), 0);
    }

    #[tokio::test]
    async fn test_view_malformed_id_skips_store() {
        let h = Harness::new();
        let (status, json) = h.view("not-an-id").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "File not found");
        assert_eq!(h.metadata.lookup_count(), 0);
        assert_eq!(h.storage.presign_count(), 0);
    }

    #[tokio::test]
    async fn test_view_object_deleted_out_of_band() {
        let h = Harness::new();
        let (_, uploaded) = h.upload("image", "gone.png", b"x").await;
        let key = h
            .storage
            .resolve_url(uploaded["fileUrl"].as_str().unwrap(), Utc::now())
            .unwrap();
        h.storage.delete(&key).await.unwrap();

        let (status, json) = h.view(uploaded["fileId"].as_str().unwrap()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "Stored object not found"})
        );
    }

    #[tokio::test]
    async fn test_view_includes_compressed_variant() {
        let h = Harness::new();
        let (_, uploaded) = h.upload("image", "big.png", b"huge").await;
        let key = h
            .storage
            .resolve_url(uploaded["fileUrl"].as_str().unwrap(), Utc::now())
            .unwrap();
        h.compressed
            .insert(&format!("resized_{key}"), Bytes::from_static(b"small"), "image/png")
            .await;

        let (status, json) = h.view(uploaded["fileId"].as_str().unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let compressed_url = json["file"]["compressedUrl"].as_str().unwrap();
        assert_eq!(
            h.compressed.resolve_url(compressed_url, Utc::now()).unwrap(),
            format!("resized_{key}")
        );
    }

    #[tokio::test]
    async fn test_storage_failure_writes_no_record() {
        let h = Harness::new();
        h.storage.set_fail_puts(true);
        let (status, json) = h.upload("image", "a.png", b"data").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("simulated put failure"));
        assert!(h.metadata.is_empty());
        assert_eq!(h.spooled_files(), 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_removes_orphan() {
        let h = Harness::new();
        h.metadata.set_fail_inserts(true);
        let (status, json) = h.upload("image", "a.png", b"data").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("simulated insert failure"));
        assert_eq!(h.storage.put_count(), 1);
        assert!(h.storage.is_empty().await);
        assert_eq!(h.spooled_files(), 0);
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let h = Harness::with_config(|c| c.server.max_upload_bytes = 256);
        let (status, json) = h.upload("image", "big.png", &[7u8; 4096]).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["success"], false);
        assert_eq!(h.storage.put_count(), 0);
        assert_eq!(h.spooled_files(), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_non_multipart_bodies() {
        let h = Harness::new();
        let requests = [
            Request::builder()
                .method("POST")
                .uri("/api/images/upload")
                .body(Body::from("raw bytes"))
                .unwrap(),
            Request::builder()
                .method("POST")
                .uri("/api/images/upload")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"image":"x"}"#))
                .unwrap(),
            Request::builder()
                .method("POST")
                .uri("/api/images/upload")
                .header("content-type", "multipart/form-data")
                .body(Body::from("no boundary"))
                .unwrap(),
        ];

        for req in requests {
            let (status, json) = h.send(req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(
                json,
                serde_json::json!({"success": false, "error": "No file uploaded"})
            );
        }
        assert_eq!(h.storage.put_count(), 0);
        assert!(h.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_signing_failure_removes_object() {
        let h = Harness::new();
        h.storage.set_fail_presigns(true);
        let (status, json) = h.upload("image", "a.png", b"data").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("simulated presign failure"));
        assert_eq!(h.storage.put_count(), 1);
        assert!(h.storage.is_empty().await);
        assert!(h.metadata.is_empty());
        assert_eq!(h.spooled_files(), 0);
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_original_error() {
        let h = Harness::new();
        h.metadata.set_fail_inserts(true);
        h.storage.set_fail_deletes(true);
        let (status, json) = h.upload("image", "a.png", b"data").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("simulated insert failure"));
        // The delete failed, so the object is left behind.
        assert_eq!(h.storage.len().await, 1);
        assert!(h.metadata.is_empty());
        assert_eq!(h.spooled_files(), 0);
    }

    #[tokio::test]
    async fn test_file_of_exactly_the_cap_is_accepted() {
        let h = Harness::with_config(|c| c.server.max_upload_bytes = 1000);
        let (status, json) = h.upload("image", "exact.png", &[7u8; 1000]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        let (status, _) = h.upload("image", "over.png", &[7u8; 1001]).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(h.storage.put_count(), 1);
        assert_eq!(h.spooled_files(), 0);
    }

    #[tokio::test]
    async fn test_signed_url_serves_object() {
        let h = Harness::new();
        let (_, uploaded) = h.upload("image", "a b.png", b"pixels").await;

        let response = h.get(uploaded["fileUrl"].as_str().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"pixels");

        let (_, viewed) = h.view(uploaded["fileId"].as_str().unwrap()).await;
        let response = h.get(viewed["file"]["accessUrl"].as_str().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tampered_object_url_is_forbidden() {
        let h = Harness::new();
        let (_, uploaded) = h.upload("image", "a.png", b"pixels").await;
        let url = uploaded["fileUrl"].as_str().unwrap();

        let tampered = url.replace("X-Amz-Expires=3600", "X-Amz-Expires=7200");
        let response = h.get(&tampered).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let unsigned = url.split_once('?').unwrap().0;
        let response = h.get(unsigned).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_object_route_needs_local_buckets() {
        let upload_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.upload_dir = upload_dir.path().to_str().unwrap().to_string();
        let storage = Arc::new(MemoryBackend::new(&MemoryStorageConfig::default()));
        let state = Arc::new(AppState {
            config,
            metadata: Arc::new(MemoryMetadataStore::new()),
            storage: storage.clone(),
            compressed: None,
            local_buckets: Vec::new(),
        });
        storage
            .insert("images/1-a.png", Bytes::from_static(b"x"), "image/png")
            .await;
        let url = storage.sign_url("images/1-a.png", std::time::Duration::from_secs(60), Utc::now());
        let path = url.strip_prefix("http://localhost:3000").unwrap();

        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = app(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = Harness::new();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = h.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_openapi_lists_routes() {
        let h = Harness::new();
        let req = Request::builder()
            .uri("/openapi.json")
            .body(Body::empty())
            .unwrap();
        let (status, json) = h.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["paths"]["/api/images/upload"].is_object());
        assert!(json["paths"]["/api/images/view-image/{id}"].is_object());
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let h = Harness::new();
        let req = Request::builder()
            .uri("/health")
            .header("origin", "https://example.com")
            .body(Body::empty())
            .unwrap();
        let response = app(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_static_fallback() {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), "<h1>picvault</h1>").unwrap();
        let dir = static_dir.path().to_str().unwrap().to_string();
        let h = Harness::with_config(move |c| c.server.static_dir = Some(dir));

        let req = Request::builder()
            .uri("/index.html")
            .body(Body::empty())
            .unwrap();
        let response = app(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<h1>picvault</h1>");
    }
}
