#![allow(dead_code)]
#![allow(unused_variables)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::manual_strip)]
#![allow(clippy::needless_borrows_for_generic_args)]
#![allow(clippy::result_large_err)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::trim_split_whitespace)]
#![allow(clippy::type_complexity)]
#![allow(clippy::unnecessary_get_then_check)]

mod auth;
mod authz;
mod awareness;
mod blob;
pub mod compaction;
pub mod config;
mod cors;
mod crdt;
mod db;
mod error;
mod metrics;
mod protocol;
mod registry;
pub mod store;
pub mod validation;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderValue, Request, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::auth::AuthVerifier;
use crate::authz::{PermissionOracle, PermissionStore};
use crate::awareness::AwarenessStore;
use crate::blob::{BlobStore, S3BlobStore};
use crate::compaction::CompactionWorker;
use crate::db::pool::{check_pool_health, create_pg_pool, PoolConfig};
use crate::error::{
    attach_request_id_header, attach_trace_id_header, default_code_for_status,
    request_id_from_headers_or_generate, trace_id_from_headers_or_generate, with_request_id_scope,
    with_trace_id_scope, ErrorCode, RelayError, REQUEST_ID_HEADER, TRACE_ID_HEADER,
};
use crate::metrics::{set_global_metrics, RelayMetrics};
use crate::registry::ReplicaRegistry;
use crate::store::log::LogStore;
use crate::store::snapshot::SnapshotStore;
use crate::ws::{SessionHub, WsRouterState};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
type DbCheckFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type DbCheckFn = dyn Fn() -> DbCheckFuture + Send + Sync;

/// Reports whether the server's downstream dependencies are reachable.
///
/// One check per downstream the relay actually talks to: a database
/// check, plus a blob-store reachability check, plus, when running in
/// remote-auth mode, an identity-service reachability check. There is
/// no global recovery pass to wait on — each document's sequence
/// recovers lazily, the first time `ReplicaRegistry::acquire` hydrates
/// it.
#[derive(Clone)]
struct ReadinessProbe {
    db_check: Arc<DbCheckFn>,
    blob_check: Arc<DbCheckFn>,
    identity_check: Arc<DbCheckFn>,
}

impl ReadinessProbe {
    fn from_checks(
        db_check: Arc<DbCheckFn>,
        blob_check: Arc<DbCheckFn>,
        identity_check: Arc<DbCheckFn>,
    ) -> Self {
        Self { db_check, blob_check, identity_check }
    }

    fn always_ok() -> Arc<DbCheckFn> {
        Arc::new(|| Box::pin(async { Ok(()) }) as DbCheckFuture)
    }

    fn from_pool(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        let db_check = Arc::new(move || {
            let pool = Arc::clone(&pool);
            Box::pin(async move { check_pool_health(&pool).await })
                as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        });

        Self { db_check, blob_check: Self::always_ok(), identity_check: Self::always_ok() }
    }

    fn with_blob_check<F>(mut self, blob_check: F) -> Self
    where
        F: Fn() -> DbCheckFuture + Send + Sync + 'static,
    {
        self.blob_check = Arc::new(blob_check);
        self
    }

    fn with_identity_check<F>(mut self, identity_check: F) -> Self
    where
        F: Fn() -> DbCheckFuture + Send + Sync + 'static,
    {
        self.identity_check = Arc::new(identity_check);
        self
    }

    #[cfg(test)]
    fn from_db_check<F>(db_check: F) -> Self
    where
        F: Fn() -> DbCheckFuture + Send + Sync + 'static,
    {
        Self {
            db_check: Arc::new(db_check),
            blob_check: Self::always_ok(),
            identity_check: Self::always_ok(),
        }
    }

    async fn evaluate(&self) -> ReadinessResponse {
        let db_connected = (self.db_check)().await.is_ok();
        let blob_connected = (self.blob_check)().await.is_ok();
        let identity_connected = (self.identity_check)().await.is_ok();
        ReadinessResponse {
            ready: db_connected && blob_connected && identity_connected,
            db_connected,
            blob_connected,
            identity_connected,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ReadinessResponse {
    ready: bool,
    db_connected: bool,
    blob_connected: bool,
    identity_connected: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::RelayConfig::from_env();
    cfg.validate_security().context("relay transport security configuration is invalid")?;

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_filter)),
        )
        .init();

    if cfg.is_dev_jwt_secret() {
        tracing::warn!(
            "using development JWT secret — set SCRIPTUM_RELAY_JWT_SECRET in production"
        );
    }

    let readiness_database_url = cfg
        .database_url
        .as_deref()
        .context("SCRIPTUM_RELAY_DATABASE_URL must be set for readiness checks")?;
    let pool = create_pg_pool(readiness_database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize relay PostgreSQL pool")?;
    check_pool_health(&pool).await.context("relay PostgreSQL health check failed")?;
    db::migrations::run_migrations(&pool).await.context("failed to apply relay postgres migrations")?;

    let metrics = Arc::new(RelayMetrics::default());
    set_global_metrics(Arc::clone(&metrics));

    let blob_store: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::from_env().await.context("failed to initialize relay blob store")?,
    );
    let log_store = LogStore::from_pool(pool.clone());
    let snapshot_store = Arc::new(SnapshotStore::from_pool(
        pool.clone(),
        Arc::clone(&blob_store),
        cfg.snapshot_size_limit_bytes,
    ));
    let registry = Arc::new(ReplicaRegistry::new(log_store, snapshot_store));

    let auth_verifier = Arc::new(
        AuthVerifier::from_config(&cfg.jwt_secret, cfg.identity_service_url.as_deref())
            .context("invalid relay auth verifier configuration")?,
    );
    let permission_store = PermissionStore::from_pool(pool.clone());
    let permission_oracle = Arc::new(PermissionOracle::new(permission_store));

    let readiness_probe = Arc::new({
        let blob_check_store = Arc::clone(&blob_store);
        let probe = ReadinessProbe::from_pool(pool.clone()).with_blob_check(move || {
            let blob_check_store = Arc::clone(&blob_check_store);
            Box::pin(async move { blob_check_store.get("readiness-probe").await.map(|_| ()) })
                as DbCheckFuture
        });
        match cfg.identity_service_url.clone() {
            Some(identity_service_url) => {
                let http = reqwest::Client::new();
                probe.with_identity_check(move || {
                    let http = http.clone();
                    let url = identity_service_url.clone();
                    Box::pin(async move {
                        http.get(&url)
                            .send()
                            .await
                            .context("identity service reachability check failed")?
                            .error_for_status()
                            .context("identity service returned an error status")?;
                        Ok(())
                    }) as DbCheckFuture
                })
            }
            None => probe,
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let compaction_worker = CompactionWorker::new(
        Arc::clone(&registry),
        cfg.snapshot_worker_interval,
        cfg.snapshot_threshold_updates,
    );
    let compaction_handle = tokio::spawn(compaction_worker.run(shutdown_rx));

    let ws_state = WsRouterState {
        auth_verifier,
        permission_oracle,
        registry,
        awareness_store: Arc::new(AwarenessStore::default()),
        hub: SessionHub::default(),
    };

    let app = build_router(ws_state, readiness_probe, metrics);

    let listener = TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", cfg.listen_addr))?;

    info!(listen_addr = %cfg.listen_addr, "starting relay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")?;

    let _ = shutdown_tx.send(true);
    let _ = compaction_handle.await;
    Ok(())
}

fn build_router(
    ws_state: WsRouterState,
    readiness_probe: Arc<ReadinessProbe>,
    metrics: Arc<RelayMetrics>,
) -> Router {
    apply_middleware(
        Router::new()
            .route("/health", get(health))
            .route("/healthz", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(prometheus_metrics))
            .merge(ws::router(ws_state)),
        Arc::clone(&metrics),
    )
    .layer(Extension(readiness_probe))
    .layer(Extension(metrics))
}

fn apply_middleware(router: Router, metrics: Arc<RelayMetrics>) -> Router {
    router
        .layer(cors::cors_layer())
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn_with_state(metrics, request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn ready(Extension(readiness_probe): Extension<Arc<ReadinessProbe>>) -> impl IntoResponse {
    let readiness = readiness_probe.evaluate().await;
    let status = if readiness.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(readiness))
}

async fn prometheus_metrics(Extension(metrics): Extension<Arc<RelayMetrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let trace_id = trace_id_from_headers_or_generate(request.headers());
    ensure_request_header(&mut request, REQUEST_ID_HEADER, &request_id);
    ensure_request_header(&mut request, TRACE_ID_HEADER, &trace_id);

    match tokio::spawn(with_trace_id_scope(
        trace_id.clone(),
        with_request_id_scope(request_id.clone(), async move { next.run(request).await }),
    ))
    .await
    {
        Ok(response) => response,
        Err(join_error) => {
            error!(
                ?join_error,
                request_id = %request_id,
                trace_id = %trace_id,
                "request handling panicked"
            );
            let mut response = RelayError::from_code(ErrorCode::InternalError)
                .with_request_id(request_id)
                .into_response();
            attach_trace_id_header(&mut response, &trace_id);
            response
        }
    }
}

async fn request_context_middleware(
    State(metrics): State<Arc<RelayMetrics>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let trace_id = trace_id_from_headers_or_generate(request.headers());
    ensure_request_header(&mut request, REQUEST_ID_HEADER, &request_id);
    ensure_request_header(&mut request, TRACE_ID_HEADER, &trace_id);

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let endpoint = format!("{method} {path}");
    let workspace_id = workspace_id_from_path(&path).map(|id| id.to_string());
    let actor_hash = actor_hash_from_headers(request.headers());
    let started_at = Instant::now();

    let request_span = info_span!(
        "relay.http.request",
        request_id = %request_id,
        trace_id = %trace_id,
        method = %method,
        path = %path
    );
    let mut response = with_trace_id_scope(
        trace_id.clone(),
        with_request_id_scope(request_id.clone(), next.run(request)),
    )
    .instrument(request_span)
    .await;
    attach_request_id_header(&mut response, &request_id);
    attach_trace_id_header(&mut response, &trace_id);
    let status = response.status();
    let error_code = response_error_code(&response);

    info!(
        request_id = %request_id,
        trace_id = %trace_id,
        workspace_id = workspace_id.as_deref().unwrap_or(""),
        actor_hash = actor_hash.as_deref().unwrap_or(""),
        endpoint = %endpoint,
        error_code = error_code.unwrap_or(""),
        status = status.as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "relay_request"
    );

    metrics.record_http_request(
        method.as_str(),
        &path,
        status.as_u16(),
        started_at.elapsed().as_millis() as u64,
    );

    response
}

fn ensure_request_header(request: &mut Request<Body>, header_name: &'static str, value: &str) {
    if request.headers().contains_key(header_name) {
        return;
    }
    if let Ok(header_value) = HeaderValue::from_str(value) {
        request.headers_mut().insert(header_name, header_value);
    }
}

fn workspace_id_from_path(path: &str) -> Option<Uuid> {
    let mut segments = path.trim_start_matches('/').split('/');
    while let Some(segment) = segments.next() {
        if segment == "workspaces" {
            let value = segments.next()?;
            return Uuid::parse_str(value).ok();
        }
    }
    None
}

fn actor_hash_from_headers(headers: &HeaderMap) -> Option<String> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_token)?;
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

fn parse_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

fn response_error_code(response: &Response) -> Option<&'static str> {
    if let Some(code) = response.extensions().get::<ErrorCode>() {
        return Some(code.as_str());
    }
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Some(default_code_for_status(status).as_str());
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{AUTHORIZATION, CONTENT_TYPE},
            HeaderMap, Method, Request, StatusCode,
        },
        response::IntoResponse,
        routing::{get, post},
        Router,
    };
    use serde_json::Value;
    use sha2::{Digest, Sha256};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::{
        actor_hash_from_headers, apply_middleware, build_router, response_error_code,
        workspace_id_from_path, DbCheckFuture, ReadinessProbe, MAX_REQUEST_BODY_BYTES,
    };
    use crate::authz::{PermissionOracle, PermissionStore};
    use crate::auth::AuthVerifier;
    use crate::awareness::AwarenessStore;
    use crate::blob::MemoryBlobStore;
    use crate::error::{ErrorCode, REQUEST_ID_HEADER, TRACE_ID_HEADER};
    use crate::metrics::RelayMetrics;
    use crate::registry::ReplicaRegistry;
    use crate::store::log::LogStore;
    use crate::store::snapshot::SnapshotStore;
    use crate::validation::ValidatedJson;
    use crate::ws::{SessionHub, WsRouterState};

    fn test_ws_state() -> WsRouterState {
        let log_store = LogStore::in_memory();
        let snapshot_store =
            Arc::new(SnapshotStore::in_memory(MemoryBlobStore::new(), 1024 * 1024));
        WsRouterState {
            auth_verifier: Arc::new(
                AuthVerifier::local("scriptum_test_secret_that_is_definitely_long_enough")
                    .expect("test auth verifier should initialize"),
            ),
            permission_oracle: Arc::new(PermissionOracle::new(PermissionStore::for_tests())),
            registry: Arc::new(ReplicaRegistry::new(log_store, snapshot_store)),
            awareness_store: Arc::new(AwarenessStore::default()),
            hub: SessionHub::default(),
        }
    }

    fn test_router(db_ready: bool, blob_ready: bool) -> Router {
        let readiness_probe = Arc::new(
            ReadinessProbe::from_db_check(move || {
                if db_ready {
                    Box::pin(async { Ok(()) }) as DbCheckFuture
                } else {
                    Box::pin(async { Err(anyhow::anyhow!("db unavailable")) }) as DbCheckFuture
                }
            })
            .with_blob_check(move || {
                if blob_ready {
                    Box::pin(async { Ok(()) }) as DbCheckFuture
                } else {
                    Box::pin(async { Err(anyhow::anyhow!("blob store unavailable")) })
                        as DbCheckFuture
                }
            }),
        );
        let metrics = Arc::new(RelayMetrics::default());
        build_router(test_ws_state(), readiness_probe, metrics)
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router(true, true)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("health request should build"),
            )
            .await
            .expect("health request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert!(response.headers().contains_key(TRACE_ID_HEADER));
    }

    #[tokio::test]
    async fn health_check_reuses_inbound_trace_id_header() {
        let response = test_router(true, true)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(TRACE_ID_HEADER, "trace-health-123")
                    .body(Body::empty())
                    .expect("health request should build"),
            )
            .await
            .expect("health request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(TRACE_ID_HEADER).unwrap(), "trace-health-123");
    }

    #[tokio::test]
    async fn readiness_returns_service_unavailable_when_blob_store_unreachable() {
        let response = test_router(true, false)
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .expect("ready request should build"),
            )
            .await
            .expect("ready request should return response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("ready response body should read");
        let parsed: Value =
            serde_json::from_slice(&body).expect("ready response should be valid json");
        assert_eq!(parsed["ready"], false);
        assert_eq!(parsed["db_connected"], true);
        assert_eq!(parsed["blob_connected"], false);
    }

    #[tokio::test]
    async fn readiness_returns_service_unavailable_when_database_is_unreachable() {
        let response = test_router(false, true)
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .expect("ready request should build"),
            )
            .await
            .expect("ready request should return response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("ready response body should read");
        let parsed: Value =
            serde_json::from_slice(&body).expect("ready response should be valid json");
        assert_eq!(parsed["ready"], false);
        assert_eq!(parsed["db_connected"], false);
        assert_eq!(parsed["blob_connected"], true);
    }

    #[tokio::test]
    async fn readiness_returns_ok_when_database_and_blob_store_are_ready() {
        let response = test_router(true, true)
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .expect("ready request should build"),
            )
            .await
            .expect("ready request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("ready response body should read");
        let parsed: Value =
            serde_json::from_slice(&body).expect("ready response should be valid json");
        assert_eq!(parsed["ready"], true);
        assert_eq!(parsed["db_connected"], true);
        assert_eq!(parsed["blob_connected"], true);
        assert_eq!(parsed["identity_connected"], true);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(
            Router::new().route("/panic", get(panic_route)),
            Arc::new(RelayMetrics::default()),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .header(REQUEST_ID_HEADER, "req-panic-123")
                    .header(TRACE_ID_HEADER, "trace-panic-456")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-panic-123");
        assert_eq!(response.headers().get(TRACE_ID_HEADER).unwrap(), "trace-panic-456");

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("panic response body should read");
        let parsed: Value =
            serde_json::from_slice(&body).expect("panic response body should be valid json");
        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(parsed["error"]["retryable"], true);
        assert_eq!(parsed["error"]["request_id"], "req-panic-123");
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(
            Router::new().route("/echo", post(echo)),
            Arc::new(RelayMetrics::default()),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn missing_bearer_query_token_uses_structured_error_envelope() {
        let document_id = Uuid::new_v4();

        let response = test_router(true, true)
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri(format!("/ws/document/{document_id}"))
                    .header(REQUEST_ID_HEADER, "req-auth-123")
                    .body(Body::empty())
                    .expect("ws upgrade request should build"),
            )
            .await
            .expect("ws upgrade request should return response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_json_uses_structured_error_envelope_with_request_id() {
        async fn validated_endpoint(ValidatedJson(_): ValidatedJson<Value>) -> StatusCode {
            StatusCode::NO_CONTENT
        }

        let app = apply_middleware(
            Router::new().route("/validated", post(validated_endpoint)),
            Arc::new(RelayMetrics::default()),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/validated")
                    .header(REQUEST_ID_HEADER, "req-invalid-json-123")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"email\":"))
                    .expect("validated request should build"),
            )
            .await
            .expect("validated request should return response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-invalid-json-123");

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("invalid json response body should read");
        let parsed: Value =
            serde_json::from_slice(&body).expect("invalid json response should be valid json");
        assert_eq!(parsed["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(parsed["error"]["retryable"], false);
        assert_eq!(parsed["error"]["request_id"], "req-invalid-json-123");
        assert_eq!(parsed["error"]["details"]["kind"], "syntax_error");
    }

    #[tokio::test]
    async fn missing_content_type_uses_structured_error_envelope_with_details() {
        async fn validated_endpoint(ValidatedJson(_): ValidatedJson<Value>) -> StatusCode {
            StatusCode::NO_CONTENT
        }

        let app = apply_middleware(
            Router::new().route("/validated", post(validated_endpoint)),
            Arc::new(RelayMetrics::default()),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/validated")
                    .header(REQUEST_ID_HEADER, "req-missing-content-type-123")
                    .body(Body::from("{\"ok\":true}"))
                    .expect("validated request should build"),
            )
            .await
            .expect("validated request should return response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "req-missing-content-type-123"
        );

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("missing content-type response body should read");
        let parsed: Value = serde_json::from_slice(&body)
            .expect("missing content-type response should be valid json");
        assert_eq!(parsed["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(parsed["error"]["retryable"], false);
        assert_eq!(parsed["error"]["request_id"], "req-missing-content-type-123");
        assert_eq!(parsed["error"]["details"]["kind"], "missing_content_type");
    }

    #[test]
    fn workspace_id_from_path_extracts_workspace_uuid() {
        let workspace_id = Uuid::new_v4();
        let path = format!("/v1/workspaces/{workspace_id}/documents");
        assert_eq!(workspace_id_from_path(&path), Some(workspace_id));
    }

    #[test]
    fn workspace_id_from_path_rejects_invalid_uuid() {
        assert_eq!(workspace_id_from_path("/v1/workspaces/not-a-uuid/documents"), None);
    }

    #[test]
    fn actor_hash_from_headers_hashes_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer token-abc-123".parse().expect("header is valid"));

        let actor_hash = actor_hash_from_headers(&headers).expect("hash should be produced");
        assert_eq!(actor_hash, format!("{:x}", Sha256::digest(b"token-abc-123")));
    }

    #[test]
    fn actor_hash_from_headers_skips_missing_or_invalid_auth() {
        assert_eq!(actor_hash_from_headers(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic abcdef".parse().expect("header is valid"));
        assert_eq!(actor_hash_from_headers(&headers), None);
    }

    #[test]
    fn response_error_code_uses_response_extension_when_present() {
        let mut response = StatusCode::UNAUTHORIZED.into_response();
        response.extensions_mut().insert(ErrorCode::RateLimited);
        assert_eq!(response_error_code(&response), Some("RATE_LIMITED"));
    }

    #[test]
    fn response_error_code_falls_back_to_status_mapping() {
        let response = StatusCode::UNAUTHORIZED.into_response();
        assert_eq!(response_error_code(&response), Some("AUTH_INVALID_TOKEN"));
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_red_and_custom_metrics() {
        let app = test_router(true, true);

        let _ = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("health request should build"),
            )
            .await
            .expect("health request should succeed");

        let _ = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/does-not-exist")
                    .body(Body::empty())
                    .expect("404 request should build"),
            )
            .await
            .expect("404 request should return response");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("metrics request should build"),
            )
            .await
            .expect("metrics request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .expect("metrics content-type should be present"),
            "text/plain; version=0.0.4; charset=utf-8"
        );

        let body =
            to_bytes(response.into_body(), usize::MAX).await.expect("metrics body should read");
        let rendered =
            String::from_utf8(body.to_vec()).expect("metrics body should be valid utf-8");

        assert!(rendered.contains("relay_request_rate_total"));
        assert!(rendered.contains("relay_request_errors_total"));
        assert!(rendered.contains("relay_request_duration_ms_sum"));
        assert!(rendered.contains("relay_request_duration_ms_count"));
        assert!(rendered.contains("relay_ws_rate_total"));
        assert!(rendered.contains("relay_ws_errors_total"));
        assert!(rendered.contains("relay_ws_duration_ms_sum"));
        assert!(rendered.contains("relay_ws_duration_ms_count"));
        assert!(rendered.contains("endpoint=\"/health\""));
    }
}
