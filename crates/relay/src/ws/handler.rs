// Single-phase WebSocket session handshake.
//
// `GET /ws/document/{document_id}?token=...` resolves auth and the
// per-document permission check before the upgrade completes, so there
// is no window where an unauthenticated socket is alive. Heartbeat,
// frame-size guard, mpsc outbound channel, and close-code conventions
// are handled below in `handle_socket`.

use super::protocol as ws_protocol;
use super::session::{SessionHub, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};
use crate::authz::PermissionOracle;
use crate::auth::AuthVerifier;
use crate::awareness::AwarenessStore;
use crate::error::{ErrorCode, RelayError};
use crate::metrics;
use crate::registry::{ApplyOutcome, ReplicaRegistry};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use scriptum_common::protocol::ws::WsMessage;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct WsRouterState {
    pub auth_verifier: Arc<AuthVerifier>,
    pub permission_oracle: Arc<PermissionOracle>,
    pub registry: Arc<ReplicaRegistry>,
    pub awareness_store: Arc<AwarenessStore>,
    pub hub: SessionHub,
}

pub fn router(state: WsRouterState) -> Router {
    Router::new().route("/ws/document/{document_id}", get(ws_upgrade)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
    #[serde(default)]
    since: Option<i64>,
}

pub async fn ws_upgrade(
    Path(document_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(state): State<WsRouterState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = match state.auth_verifier.verify(&query.token).await {
        Ok(identity) => identity,
        Err(error) => {
            warn!(%error, "websocket upgrade rejected: invalid access token");
            return RelayError::from_code(ErrorCode::AuthInvalidToken).into_response();
        }
    };

    let can_read = match state.permission_oracle.can_read(document_id, identity.user_id).await {
        Ok(can_read) => can_read,
        Err(error) => {
            warn!(%error, document_id = %document_id, "permission lookup failed during websocket upgrade");
            return RelayError::from_code(ErrorCode::InternalError).into_response();
        }
    };

    if !can_read {
        return RelayError::new(ErrorCode::AuthForbidden, "caller lacks access to this document")
            .into_response();
    }

    ws.max_frame_size(MAX_FRAME_BYTES as usize).on_upgrade(move |socket| {
        handle_socket(state, document_id, identity.user_id, query.since, socket)
    })
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

fn error_message(code: &str, message: impl Into<String>, retryable: bool, doc_id: Uuid) -> WsMessage {
    WsMessage::Error { code: code.to_string(), message: message.into(), retryable, doc_id: Some(doc_id) }
}

/// Initial catch-up burst sent right after upgrade: a full snapshot if
/// the client has no resume point, or just the updates it's missing.
async fn build_resume_messages(
    registry: &ReplicaRegistry,
    document_id: Uuid,
    since: Option<i64>,
) -> Vec<WsMessage> {
    match since {
        None => match registry.full_state(document_id).await {
            Some((server_seq, payload)) => vec![WsMessage::Snapshot {
                doc_id: document_id,
                snapshot_seq: server_seq,
                payload_b64: BASE64.encode(payload),
            }],
            None => Vec::new(),
        },
        Some(last_server_seq) => registry
            .updates_since(document_id, last_server_seq)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|(server_seq, payload)| WsMessage::YjsUpdate {
                doc_id: document_id,
                client_id: Uuid::nil(),
                client_update_id: Uuid::nil(),
                base_server_seq: server_seq.saturating_sub(1),
                payload_b64: BASE64.encode(payload),
            })
            .collect(),
    }
}

async fn handle_socket(
    state: WsRouterState,
    document_id: Uuid,
    user_id: Uuid,
    since: Option<i64>,
    mut socket: WebSocket,
) {
    if state.registry.acquire(document_id).await.is_err() {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    log_session_opened(document_id, user_id);

    let session_id = Uuid::new_v4();
    for message in build_resume_messages(&state.registry, document_id, since).await {
        if ws_protocol::send_ws_message(&mut socket, &message).await.is_err() {
            state.registry.release(document_id).await;
            return;
        }
    }

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    state.hub.register(session_id, document_id, outbound_sender).await;

    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS as u64));
    heartbeat_interval.reset();
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(session_id = %session_id, document_id = %document_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if ws_protocol::send_ws_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else { break };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_FRAME_BYTES as usize {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let inbound = match ws_protocol::decode_message(&raw_message) {
                            Ok(message) => message,
                            Err(_) => {
                                let error = error_message("SYNC_INVALID_MESSAGE", "invalid websocket frame payload", false, document_id);
                                if ws_protocol::send_ws_message(&mut socket, &error).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        let label = ws_message_label(&inbound);
                        let started_at = Instant::now();
                        let outcome = handle_inbound_message(&state, document_id, user_id, session_id, &mut socket, inbound).await;
                        metrics::record_ws_request(label, outcome.is_break(), started_at.elapsed().as_millis() as u64);
                        if outcome.is_break() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    info!(document_id = %document_id, user_id = %user_id, "websocket session closed");
    state.hub.unregister(session_id).await;
    state.awareness_store.remove_session(document_id, session_id).await;
    let aggregated = state.awareness_store.aggregate(document_id).await;
    let _ = state
        .hub
        .broadcast(document_id, WsMessage::AwarenessUpdate { doc_id: document_id, peers: aggregated })
        .await;
    state.registry.release(document_id).await;
}

async fn handle_inbound_message(
    state: &WsRouterState,
    document_id: Uuid,
    user_id: Uuid,
    session_id: Uuid,
    socket: &mut WebSocket,
    inbound: WsMessage,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    match inbound {
        WsMessage::Hello { .. } => {
            let ack = WsMessage::HelloAck {
                server_time: Utc::now().to_rfc3339(),
                resume_accepted: false,
                resume_token: Uuid::new_v4().to_string(),
                resume_expires_at: Utc::now().to_rfc3339(),
            };
            if ws_protocol::send_ws_message(socket, &ack).await.is_err() {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
        WsMessage::Subscribe { doc_id, last_server_seq } => {
            if doc_id != document_id {
                let error = error_message(
                    "SYNC_DOC_MISMATCH",
                    "this connection is scoped to a single document",
                    false,
                    document_id,
                );
                if ws_protocol::send_ws_message(socket, &error).await.is_err() {
                    return ControlFlow::Break(());
                }
                return ControlFlow::Continue(());
            }
            for message in build_resume_messages(&state.registry, document_id, last_server_seq).await {
                if ws_protocol::send_ws_message(socket, &message).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        }
        WsMessage::YjsUpdate { doc_id, client_id, client_update_id, base_server_seq, payload_b64 } => {
            if doc_id != document_id {
                let error =
                    error_message("SYNC_DOC_MISMATCH", "update targets the wrong document", false, document_id);
                return if ws_protocol::send_ws_message(socket, &error).await.is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                };
            }

            if !state.permission_oracle.can_write(document_id, user_id).await.unwrap_or(false) {
                let error = error_message(ErrorCode::AuthForbidden.as_str(), "caller lacks write access", false, document_id);
                return if ws_protocol::send_ws_message(socket, &error).await.is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                };
            }

            let Ok(payload) = BASE64.decode(payload_b64.as_bytes()) else {
                let error = error_message("SYNC_INVALID_MESSAGE", "payload_b64 is not valid base64", false, document_id);
                return if ws_protocol::send_ws_message(socket, &error).await.is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                };
            };

            let outcome = state
                .registry
                .apply_client_update(document_id, client_id, client_update_id, base_server_seq, payload)
                .await;

            match outcome {
                Ok(ApplyOutcome::Applied { server_seq }) => {
                    let ack = WsMessage::Ack { doc_id: document_id, client_update_id, server_seq, applied: true };
                    if ws_protocol::send_ws_message(socket, &ack).await.is_err() {
                        return ControlFlow::Break(());
                    }
                    let _ = state
                        .hub
                        .broadcast(
                            document_id,
                            WsMessage::YjsUpdate {
                                doc_id: document_id,
                                client_id,
                                client_update_id,
                                base_server_seq: server_seq.saturating_sub(1),
                                payload_b64,
                            },
                        )
                        .await;
                    ControlFlow::Continue(())
                }
                Ok(ApplyOutcome::Duplicate { server_seq }) => {
                    let ack = WsMessage::Ack { doc_id: document_id, client_update_id, server_seq, applied: false };
                    if ws_protocol::send_ws_message(socket, &ack).await.is_err() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                }
                Ok(ApplyOutcome::RejectedBaseSeq { head_server_seq }) => {
                    let error = error_message(
                        "SYNC_BASE_SERVER_SEQ_MISMATCH",
                        format!("base_server_seq exceeds head server sequence ({head_server_seq})"),
                        true,
                        document_id,
                    );
                    if ws_protocol::send_ws_message(socket, &error).await.is_err() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                }
                Err(error) => {
                    warn!(%error, document_id = %document_id, "failed to durably apply crdt update");
                    let error = error_message(ErrorCode::InternalError.as_str(), "failed to persist update", true, document_id);
                    let _ = ws_protocol::send_ws_message(socket, &error).await;
                    ControlFlow::Break(())
                }
            }
        }
        WsMessage::AwarenessUpdate { doc_id, peers } => {
            if doc_id != document_id {
                return ControlFlow::Continue(());
            }
            state.awareness_store.update(document_id, session_id, peers).await;
            let aggregated = state.awareness_store.aggregate_excluding(document_id, session_id).await;
            let _ = state
                .hub
                .broadcast_excluding(
                    document_id,
                    WsMessage::AwarenessUpdate { doc_id: document_id, peers: aggregated },
                    session_id,
                )
                .await;
            ControlFlow::Continue(())
        }
        _ => {
            let error = error_message(
                "SYNC_UNSUPPORTED_MESSAGE",
                "message type is not supported by this relay build",
                true,
                document_id,
            );
            if ws_protocol::send_ws_message(socket, &error).await.is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }
}

fn ws_message_label(message: &WsMessage) -> &'static str {
    match message {
        WsMessage::Hello { .. } => "hello",
        WsMessage::HelloAck { .. } => "hello_ack",
        WsMessage::Subscribe { .. } => "subscribe",
        WsMessage::YjsUpdate { .. } => "yjs_update",
        WsMessage::Ack { .. } => "ack",
        WsMessage::AwarenessUpdate { .. } => "awareness_update",
        WsMessage::Snapshot { .. } => "snapshot",
        WsMessage::Error { .. } => "error",
    }
}

fn log_session_opened(document_id: Uuid, user_id: Uuid) {
    info!(document_id = %document_id, user_id = %user_id, "websocket session opened");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::PermissionStore;
    use crate::blob::MemoryBlobStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use crate::store::log::LogStore;
    use crate::store::snapshot::SnapshotStore;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;
    use tower::ServiceExt;

    const TEST_SECRET: &str = "scriptum_test_secret_that_is_definitely_long_enough";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        username: Option<String>,
        email: Option<String>,
        exp: i64,
    }

    fn sign(user_id: Uuid) -> String {
        let claims = TestClaims {
            sub: user_id.to_string(),
            username: None,
            email: None,
            exp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock before epoch")
                .as_secs() as i64
                + 900,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes()))
            .expect("token should encode")
    }

    fn test_state_with_store(permission_store: PermissionStore) -> WsRouterState {
        let log_store = LogStore::in_memory();
        let snapshot_store = Arc::new(SnapshotStore::in_memory(MemoryBlobStore::new(), 1024 * 1024));
        WsRouterState {
            auth_verifier: Arc::new(
                AuthVerifier::local(TEST_SECRET).expect("test auth verifier should initialize"),
            ),
            permission_oracle: Arc::new(PermissionOracle::new(permission_store)),
            registry: Arc::new(ReplicaRegistry::new(log_store, snapshot_store)),
            awareness_store: Arc::new(AwarenessStore::default()),
            hub: SessionHub::default(),
        }
    }

    fn test_state() -> WsRouterState {
        test_state_with_store(PermissionStore::for_tests())
    }

    #[test]
    fn is_frame_size_violation_detects_known_messages() {
        let too_long = axum::Error::new(std::io::Error::new(std::io::ErrorKind::Other, "message too long"));
        let unrelated = axum::Error::new(std::io::Error::new(std::io::ErrorKind::Other, "connection reset"));
        assert!(is_frame_size_violation(&too_long));
        assert!(!is_frame_size_violation(&unrelated));
    }

    #[tokio::test]
    async fn build_resume_messages_with_no_snapshot_returns_empty() {
        let registry = ReplicaRegistry::new(
            LogStore::in_memory(),
            Arc::new(SnapshotStore::in_memory(MemoryBlobStore::new(), 1024 * 1024)),
        );
        let document_id = Uuid::new_v4();
        registry.acquire(document_id).await.unwrap();

        let messages = build_resume_messages(&registry, document_id, None).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn build_resume_messages_with_snapshot_returns_single_snapshot_message() {
        use yrs::{Doc, Text, Transact};

        let registry = ReplicaRegistry::new(
            LogStore::in_memory(),
            Arc::new(SnapshotStore::in_memory(MemoryBlobStore::new(), 1024 * 1024)),
        );
        let document_id = Uuid::new_v4();
        registry.acquire(document_id).await.unwrap();

        let doc = Doc::new();
        {
            let text = doc.get_or_insert_text("content");
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 0, "hi");
        }
        let payload = doc.transact().encode_state_as_update_v1(&yrs::StateVector::default());
        registry
            .apply_client_update(document_id, Uuid::new_v4(), Uuid::new_v4(), 0, payload)
            .await
            .unwrap();

        let messages = build_resume_messages(&registry, document_id, None).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], WsMessage::Snapshot { snapshot_seq: 1, .. }));
    }

    #[tokio::test]
    async fn build_resume_messages_with_since_returns_yjs_updates() {
        use yrs::{Doc, Text, Transact};

        let registry = ReplicaRegistry::new(
            LogStore::in_memory(),
            Arc::new(SnapshotStore::in_memory(MemoryBlobStore::new(), 1024 * 1024)),
        );
        let document_id = Uuid::new_v4();
        registry.acquire(document_id).await.unwrap();

        let doc = Doc::new();
        {
            let text = doc.get_or_insert_text("content");
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 0, "hi");
        }
        let payload = doc.transact().encode_state_as_update_v1(&yrs::StateVector::default());
        registry
            .apply_client_update(document_id, Uuid::new_v4(), Uuid::new_v4(), 0, payload)
            .await
            .unwrap();

        let messages = build_resume_messages(&registry, document_id, Some(0)).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], WsMessage::YjsUpdate { base_server_seq: 0, .. }));
    }

    #[tokio::test]
    async fn ws_upgrade_rejects_missing_token() {
        let state = test_state();
        let document_id = Uuid::new_v4();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/ws/document/{document_id}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should complete");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ws_upgrade_rejects_invalid_token() {
        let state = test_state();
        let document_id = Uuid::new_v4();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/ws/document/{document_id}?token=not-a-real-token"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should complete");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_upgrade_rejects_caller_without_read_access() {
        let state = test_state();
        let document_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let token = sign(user_id);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/ws/document/{document_id}?token={token}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should complete");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn ws_upgrade_accepts_caller_with_read_access() {
        let document_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let token = sign(user_id);

        let permission_store = PermissionStore::for_tests();
        permission_store.seed_document(document_id, user_id, None).await;
        let state = test_state_with_store(permission_store);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/ws/document/{document_id}?token={token}"))
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .header("sec-websocket-version", "13")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should complete");

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    }
}
