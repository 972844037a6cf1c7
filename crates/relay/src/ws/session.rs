// Session bookkeeping for the single-phase WebSocket handshake.
//
// Grounded on `SyncSessionStore`/`DocSyncStore`'s connection bookkeeping
// (active-connection counting, per-session outbound channel,
// broadcast/broadcast-excluding), simplified because a session here is
// scoped to exactly one document from the URL path rather than a
// dynamic set subscribed to over the socket's lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use scriptum_common::protocol::ws::WsMessage;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub(crate) const HEARTBEAT_INTERVAL_MS: u32 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: u32 = 262_144;

struct SessionHandle {
    document_id: Uuid,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

/// Tracks live WebSocket sessions and their document subscription, and
/// routes broadcasts to every session attached to a document.
#[derive(Clone, Default)]
pub struct SessionHub {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
    subscribers: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

impl SessionHub {
    pub async fn register(
        &self,
        session_id: Uuid,
        document_id: Uuid,
        outbound: mpsc::UnboundedSender<WsMessage>,
    ) {
        self.sessions.write().await.insert(session_id, SessionHandle { document_id, outbound });
        self.subscribers.write().await.entry(document_id).or_default().insert(session_id);
    }

    pub async fn unregister(&self, session_id: Uuid) {
        let Some(handle) = self.sessions.write().await.remove(&session_id) else {
            return;
        };
        let mut subscribers = self.subscribers.write().await;
        if let Some(sessions) = subscribers.get_mut(&handle.document_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                subscribers.remove(&handle.document_id);
            }
        }
    }

    pub async fn broadcast(&self, document_id: Uuid, message: WsMessage) -> usize {
        self.broadcast_impl(document_id, message, None).await
    }

    pub async fn broadcast_excluding(
        &self,
        document_id: Uuid,
        message: WsMessage,
        exclude_session: Uuid,
    ) -> usize {
        self.broadcast_impl(document_id, message, Some(exclude_session)).await
    }

    async fn broadcast_impl(
        &self,
        document_id: Uuid,
        message: WsMessage,
        exclude_session: Option<Uuid>,
    ) -> usize {
        let recipients = {
            let subscribers = self.subscribers.read().await;
            let sessions = self.sessions.read().await;
            subscribers
                .get(&document_id)
                .into_iter()
                .flatten()
                .filter(|session_id| Some(**session_id) != exclude_session)
                .filter_map(|session_id| sessions.get(session_id).map(|handle| handle.outbound.clone()))
                .collect::<Vec<_>>()
        };

        recipients.into_iter().filter(|sender| sender.send(message.clone()).is_ok()).count()
    }

    pub async fn subscriber_count(&self, document_id: Uuid) -> usize {
        self.subscribers.read().await.get(&document_id).map(HashSet::len).unwrap_or(0)
    }
}
