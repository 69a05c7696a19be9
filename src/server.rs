//! Axum router construction.
//!
//! The [`app`] function wires the S3 PUT surface and the service endpoints
//! and returns a ready-to-serve [`axum::Router`].
//!
//! S3 distinguishes operations by query parameters and headers, not just
//! path and method, so each PUT path shape has a single handler and
//! [`crate::routes::put`] decides the operation.  Other S3 verbs are not
//! routed by this gateway and answer `MethodNotAllowed`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, put},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::{generate_request_id, S3Error};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::request::ApiRequest;
use crate::routes::route_put;
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the s3gate PUT surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "s3gate S3-Compatible API",
        version = "0.1.0",
        description = "S3-compatible gateway: PUT routing, authorization and body integrity"
    ),
    paths(health_check, handle_put_bucket, handle_put_object),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Bucket", description = "S3 bucket operations"),
        (name = "Object", description = "S3 object operations"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`].
pub fn app(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.config.observability.metrics;

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route("/", any(method_not_allowed))
        .route(
            "/:bucket",
            put(handle_put_bucket).fallback(method_not_allowed),
        )
        .route(
            "/:bucket/",
            put(handle_put_bucket).fallback(method_not_allowed),
        )
        .route(
            "/:bucket/*key",
            put(handle_put_object).fallback(method_not_allowed),
        );
    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state)
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http());
    let router = if metrics_enabled {
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    };

    // Object payloads are streamed; buffered bodies carry their own limit.
    router.layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-amz-request-id` (unless the error renderer already set one),
/// `Date` and `Server` to every response.
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-amz-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-amz-request-id", value);
        }
    }
    if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(std::time::SystemTime::now()))
    {
        headers.insert("date", date);
    }
    headers.insert("server", HeaderValue::from_static("s3gate"));

    response
}

// -- Service endpoints -------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /openapi.json`
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

async fn method_not_allowed() -> S3Error {
    S3Error::MethodNotAllowed
}

// -- PUT dispatch --------------------------------------------------------------

/// `PUT /{bucket}` -- CreateBucket or, with `?acl`, PutBucketAcl.
#[utoipa::path(
    put,
    path = "/{bucket}",
    tag = "Bucket",
    operation_id = "PutBucket",
    params(("bucket" = String, Path, description = "Bucket name")),
    responses(
        (status = 200, description = "Bucket created or ACL updated"),
        (status = 400, description = "Malformed XML or invalid bucket name"),
        (status = 403, description = "Access denied"),
        (status = 409, description = "Bucket already exists")
    )
)]
async fn handle_put_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    req: Request<Body>,
) -> Response {
    route(state, bucket, None, req).await
}

/// `PUT /{bucket}/{key}` -- PutObject, UploadPart (`?partNumber`),
/// PutObjectAcl (`?acl`) or CopyObject (`x-amz-copy-source`).
#[utoipa::path(
    put,
    path = "/{bucket}/{key}",
    tag = "Object",
    operation_id = "PutObject",
    params(
        ("bucket" = String, Path, description = "Bucket name"),
        ("key" = String, Path, description = "Object key")
    ),
    responses(
        (status = 200, description = "Object written; quoted MD5 in the ETag header"),
        (status = 400, description = "Invalid digest or argument"),
        (status = 403, description = "Access denied"),
        (status = 411, description = "Content-Length required")
    )
)]
async fn handle_put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    req: Request<Body>,
) -> Response {
    route(state, bucket, Some(key), req).await
}

async fn route(
    state: Arc<AppState>,
    bucket: String,
    key: Option<String>,
    req: Request<Body>,
) -> Response {
    let (parts, body) = req.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let encrypted = state.config.server.tls_terminated || forwarded_https(&parts.headers);

    let request = ApiRequest::new(
        parts.method,
        parts.uri.path(),
        parts.uri.query(),
        parts.headers,
        &bucket,
        key.as_deref(),
    )
    .with_peer(remote_addr, encrypted);

    route_put(&state.api, request, body, state.config.server.max_buffered_body).await
}

/// Whether a fronting proxy reports the client connection as TLS.
fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}
