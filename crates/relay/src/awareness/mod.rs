// Awareness aggregation (presence, cursors, and section claims).
//
// Keyed by plain `(doc_id, session_id)` — sessions here are scoped to a
// single document, not a workspace, so no workspace dimension is needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tracks per-document awareness (cursors, presence, names) from each session.
#[derive(Debug, Clone, Default)]
pub struct AwarenessStore {
    state: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, Vec<serde_json::Value>>>>>,
}

impl AwarenessStore {
    /// Update awareness for a session's contribution to a document.
    pub async fn update(&self, document_id: Uuid, session_id: Uuid, peers: Vec<serde_json::Value>) {
        let mut guard = self.state.write().await;
        let doc_state = guard.entry(document_id).or_default();
        if peers.is_empty() {
            doc_state.remove(&session_id);
        } else {
            doc_state.insert(session_id, peers);
        }
    }

    /// Remove a session's awareness contribution (on disconnect).
    pub async fn remove_session(&self, document_id: Uuid, session_id: Uuid) {
        let mut guard = self.state.write().await;
        if let Some(doc_state) = guard.get_mut(&document_id) {
            doc_state.remove(&session_id);
            if doc_state.is_empty() {
                guard.remove(&document_id);
            }
        }
    }

    /// Get aggregated awareness for a document (all sessions' peers merged).
    pub async fn aggregate(&self, document_id: Uuid) -> Vec<serde_json::Value> {
        let guard = self.state.read().await;
        guard
            .get(&document_id)
            .map(|doc_state| doc_state.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Get aggregated awareness excluding a specific session (for broadcast).
    pub async fn aggregate_excluding(
        &self,
        document_id: Uuid,
        exclude_session: Uuid,
    ) -> Vec<serde_json::Value> {
        let guard = self.state.read().await;
        guard
            .get(&document_id)
            .map(|doc_state| {
                doc_state
                    .iter()
                    .filter(|(sid, _)| **sid != exclude_session)
                    .flat_map(|(_, peers)| peers.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get typed peer states for a document by parsing raw JSON values.
    pub async fn peers_for_doc(&self, document_id: Uuid) -> Vec<PeerState> {
        let raw = self.aggregate(document_id).await;
        raw.into_iter().filter_map(|v| PeerState::from_json(&v)).collect()
    }

    /// Count active sessions contributing awareness to a document.
    pub async fn active_session_count(&self, document_id: Uuid) -> usize {
        self.state.read().await.get(&document_id).map(HashMap::len).unwrap_or(0)
    }
}

/// A typed, structured view of a single peer's awareness state.
///
/// Parsed from the raw `serde_json::Value` sent by clients.
/// Unknown fields are silently ignored so older clients still work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerState {
    /// Display name of this peer.
    pub name: String,
    /// Hex color assigned to this peer (e.g. "#e06c75").
    #[serde(default)]
    pub color: Option<String>,
    /// Absolute cursor offset in the document.
    #[serde(default)]
    pub cursor: Option<u32>,
    /// Selection range (anchor, head) — `None` when collapsed to cursor.
    #[serde(default)]
    pub selection: Option<SelectionRange>,
    /// Whether this peer is a human or an agent.
    #[serde(default)]
    pub editor_type: Option<EditorKind>,
    /// Agent ID if `editor_type` is `Agent`.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Advisory section lease claims from this peer.
    #[serde(default)]
    pub claimed_sections: Vec<String>,
    /// Timestamp of last cursor/edit activity.
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
}

impl PeerState {
    /// Try to parse a `PeerState` from a raw JSON value.
    /// Returns `None` if the value lacks the required `name` field.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Cursor selection range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionRange {
    /// Anchor position (selection start).
    pub anchor: u32,
    /// Head position (selection end / caret).
    pub head: u32,
}

/// Whether a peer is a human editor or an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditorKind {
    Human,
    Agent,
}

/// Presence snapshot for a single document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocPresence {
    pub doc_id: Uuid,
    pub peers: Vec<PeerState>,
}
