// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (auth verifier, DB pool, etc.) may
// still read their own env vars — this module covers the core server
// and CRDT-pipeline settings.

use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for local access-token verification.
    pub jwt_secret: String,
    /// Base URL for WebSocket connections (e.g. `wss://relay.example.dev`).
    pub ws_base_url: String,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// MinIO / S3-compatible endpoint for the blob store adapter.
    pub minio_endpoint: Option<String>,
    pub minio_access_key: Option<String>,
    pub minio_secret_key: Option<String>,
    pub minio_bucket: String,
    /// Base URL of the external identity service for token introspection.
    pub identity_service_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `scriptum_relay=debug`).
    pub log_filter: String,
    /// Update-count threshold that triggers a snapshot compaction.
    pub snapshot_threshold_updates: i64,
    /// Compaction worker tick interval.
    pub snapshot_worker_interval: Duration,
    /// Snapshot size above which the blob store (not Postgres) holds the bytes.
    pub snapshot_size_limit_bytes: usize,
    /// Debounce window for coalescing replica stores.
    pub debounce: Duration,
    /// Hard ceiling on debounce coalescing.
    pub max_debounce: Duration,
    /// Idle time before an unsubscribed replica is evicted from the registry.
    pub idle_ttl: Duration,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SCRIPTUM_RELAY_HOST` | `0.0.0.0` |
    /// | `SCRIPTUM_RELAY_PORT` | `8080` |
    /// | `SCRIPTUM_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `SCRIPTUM_RELAY_WS_BASE_URL` | `wss://{host}:{port}` |
    /// | `SCRIPTUM_RELAY_DATABASE_URL` | *(none)* |
    /// | `SCRIPTUM_RELAY_MINIO_ENDPOINT` | *(none)* |
    /// | `SCRIPTUM_RELAY_MINIO_BUCKET` | `crdt-snapshots` |
    /// | `SCRIPTUM_RELAY_IDENTITY_SERVICE_URL` | *(none)* |
    /// | `SCRIPTUM_RELAY_CORS_ORIGINS` | *(none — cors.rs uses dev defaults)* |
    /// | `SCRIPTUM_RELAY_LOG_FILTER` | `info` |
    /// | `SCRIPTUM_RELAY_SNAPSHOT_THRESHOLD_UPDATES` | `200` |
    /// | `SCRIPTUM_RELAY_SNAPSHOT_WORKER_INTERVAL_MS` | `30000` |
    /// | `SCRIPTUM_RELAY_SNAPSHOT_SIZE_LIMIT_MB` | `5` |
    /// | `SCRIPTUM_RELAY_DEBOUNCE_MS` | `2000` |
    /// | `SCRIPTUM_RELAY_MAX_DEBOUNCE_MS` | `10000` |
    /// | `SCRIPTUM_RELAY_IDLE_TTL_MS` | `30000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("SCRIPTUM_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("SCRIPTUM_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("SCRIPTUM_RELAY_JWT_SECRET")
            .unwrap_or_else(|_| "scriptum_local_development_jwt_secret_must_be_32_chars".into());

        let ws_base_url =
            env("SCRIPTUM_RELAY_WS_BASE_URL").unwrap_or_else(|_| format!("wss://{listen_addr}"));

        let database_url = env("SCRIPTUM_RELAY_DATABASE_URL").ok();
        let minio_endpoint = env("SCRIPTUM_RELAY_MINIO_ENDPOINT").ok();
        let minio_access_key = env("SCRIPTUM_RELAY_MINIO_ACCESS_KEY").ok();
        let minio_secret_key = env("SCRIPTUM_RELAY_MINIO_SECRET_KEY").ok();
        let minio_bucket =
            env("SCRIPTUM_RELAY_MINIO_BUCKET").unwrap_or_else(|_| "crdt-snapshots".into());
        let identity_service_url = env("SCRIPTUM_RELAY_IDENTITY_SERVICE_URL").ok();
        let cors_origins = env("SCRIPTUM_RELAY_CORS_ORIGINS").ok();

        let log_filter = env("SCRIPTUM_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let snapshot_threshold_updates = env("SCRIPTUM_RELAY_SNAPSHOT_THRESHOLD_UPDATES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(200);

        let snapshot_worker_interval_ms = env("SCRIPTUM_RELAY_SNAPSHOT_WORKER_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30_000);

        let snapshot_size_limit_mb = env("SCRIPTUM_RELAY_SNAPSHOT_SIZE_LIMIT_MB")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(5);

        let debounce_ms = env("SCRIPTUM_RELAY_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(2_000);

        let max_debounce_ms = env("SCRIPTUM_RELAY_MAX_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10_000);

        let idle_ttl_ms = env("SCRIPTUM_RELAY_IDLE_TTL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30_000);

        Self {
            listen_addr,
            jwt_secret,
            ws_base_url,
            database_url,
            minio_endpoint,
            minio_access_key,
            minio_secret_key,
            minio_bucket,
            identity_service_url,
            cors_origins,
            log_filter,
            snapshot_threshold_updates,
            snapshot_worker_interval: Duration::from_millis(snapshot_worker_interval_ms),
            snapshot_size_limit_bytes: snapshot_size_limit_mb * 1024 * 1024,
            debounce: Duration::from_millis(debounce_ms),
            max_debounce: Duration::from_millis(max_debounce_ms),
            idle_ttl: Duration::from_millis(idle_ttl_ms),
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "scriptum_local_development_jwt_secret_must_be_32_chars"
    }

    /// Validate transport security requirements.
    pub fn validate_security(&self) -> Result<()> {
        validate_ws_base_url(&self.ws_base_url)
    }
}

fn validate_ws_base_url(value: &str) -> Result<()> {
    let parsed = Url::parse(value)
        .with_context(|| format!("SCRIPTUM_RELAY_WS_BASE_URL is not a valid URL: `{value}`"))?;
    match parsed.scheme() {
        "wss" => Ok(()),
        "ws" if is_loopback_host(parsed.host_str()) => Ok(()),
        _ => bail!(
            "SCRIPTUM_RELAY_WS_BASE_URL must use wss:// (ws:// is allowed only for localhost testing)"
        ),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}
