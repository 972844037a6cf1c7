// Replica registry: the process-wide `document_id -> Replica` map.
//
// A `RwLock<HashMap<...>>` of lazily-hydrated replicas, each guarding its
// own CRDT merge and log append under a per-replica lock so the map-level
// lock is never held across I/O. The per-replica lock is released before
// the caller broadcasts the resulting update to subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{Mutex, RwLock};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::crdt::engine::{CrdtEngineError, Replica};
use crate::store::log::{LogStore, PendingUpdate};
use crate::store::snapshot::SnapshotStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { server_seq: i64 },
    Duplicate { server_seq: i64 },
    RejectedBaseSeq { head_server_seq: i64 },
}

#[derive(Debug, Clone)]
pub struct CompactionCandidate {
    pub document_id: Uuid,
    pub updates_since_snapshot: i64,
    pub idle_for: Duration,
}

struct ReplicaEntry {
    replica: Replica,
    subscribers: usize,
    last_touched: Instant,
    dedupe: HashMap<(Uuid, Uuid), i64>,
    updates_since_snapshot: i64,
}

pub struct ReplicaRegistry {
    log_store: LogStore,
    snapshot_store: Arc<SnapshotStore>,
    entries: RwLock<HashMap<Uuid, Arc<Mutex<ReplicaEntry>>>>,
}

impl ReplicaRegistry {
    pub fn new(log_store: LogStore, snapshot_store: Arc<SnapshotStore>) -> Self {
        Self { log_store, snapshot_store, entries: RwLock::new(HashMap::new()) }
    }

    /// Load (or reuse) a document's replica and register a subscriber,
    /// returning the current head sequence.
    pub async fn acquire(&self, document_id: Uuid) -> Result<i64> {
        async {
            if let Some(entry) = self.entries.read().await.get(&document_id).cloned() {
                let mut entry = entry.lock().await;
                entry.subscribers += 1;
                entry.last_touched = Instant::now();
                return Ok(entry.replica.head_server_seq());
            }

            let current_snapshot = self.snapshot_store.current(document_id).await?;
            let snapshot_tuple =
                current_snapshot.as_ref().map(|snap| (snap.server_seq, snap.payload.as_slice()));
            let since = current_snapshot.as_ref().map(|snap| snap.server_seq).unwrap_or(0);
            let updates = self
                .log_store
                .updates_since(document_id, since)
                .await?
                .into_iter()
                .map(|update| (update.server_seq, update.payload))
                .collect::<Vec<_>>();

            let replica =
                Replica::hydrate(snapshot_tuple, &updates).context("failed to hydrate replica")?;
            let head_server_seq = replica.head_server_seq();

            let mut entries = self.entries.write().await;
            let entry = entries.entry(document_id).or_insert_with(|| {
                Arc::new(Mutex::new(ReplicaEntry {
                    replica,
                    subscribers: 0,
                    last_touched: Instant::now(),
                    dedupe: HashMap::new(),
                    updates_since_snapshot: 0,
                }))
            });
            let mut entry = entry.lock().await;
            entry.subscribers += 1;
            entry.last_touched = Instant::now();
            Ok(entry.replica.head_server_seq())
        }
        .instrument(info_span!("relay.registry.acquire", document_id = %document_id))
        .await
    }

    pub async fn release(&self, document_id: Uuid) {
        if let Some(entry) = self.entries.read().await.get(&document_id).cloned() {
            let mut entry = entry.lock().await;
            entry.subscribers = entry.subscribers.saturating_sub(1);
            entry.last_touched = Instant::now();
        }
    }

    /// Sequence, merge, and durably log a client update. Fatal log
    /// failures propagate to the caller, which must treat them as
    /// fatal to the in-flight session operation.
    pub async fn apply_client_update(
        &self,
        document_id: Uuid,
        client_id: Uuid,
        client_update_id: Uuid,
        base_server_seq: i64,
        payload: Vec<u8>,
    ) -> Result<ApplyOutcome> {
        async {
            let Some(entry) = self.entries.read().await.get(&document_id).cloned() else {
                anyhow::bail!("document {document_id} has no acquired replica");
            };
            let mut entry = entry.lock().await;

            if let Some(&server_seq) = entry.dedupe.get(&(client_id, client_update_id)) {
                return Ok(ApplyOutcome::Duplicate { server_seq });
            }

            let server_seq = entry.replica.head_server_seq() + 1;
            match entry.replica.apply(base_server_seq, server_seq, &payload) {
                Ok(()) => {}
                Err(CrdtEngineError::BaseServerSeqAhead { head_server_seq, .. }) => {
                    return Ok(ApplyOutcome::RejectedBaseSeq { head_server_seq });
                }
                Err(other) => return Err(anyhow::anyhow!(other)),
            }

            self.log_store
                .append(PendingUpdate { document_id, server_seq, client_id, client_update_id, payload })
                .await
                .context("failed to durably log crdt update")?;

            entry.dedupe.insert((client_id, client_update_id), server_seq);
            entry.updates_since_snapshot += 1;
            entry.last_touched = Instant::now();

            Ok(ApplyOutcome::Applied { server_seq })
        }
        .instrument(info_span!(
            "relay.registry.apply_client_update",
            document_id = %document_id,
            client_id = %client_id
        ))
        .await
    }

    /// Updates strictly after `since`, used to build resume state.
    pub async fn updates_since(&self, document_id: Uuid, since: i64) -> Result<Vec<(i64, Vec<u8>)>> {
        Ok(self
            .log_store
            .updates_since(document_id, since)
            .await?
            .into_iter()
            .map(|update| (update.server_seq, update.payload))
            .collect())
    }

    /// Full document state, for clients joining without a resume point.
    pub async fn full_state(&self, document_id: Uuid) -> Option<(i64, Vec<u8>)> {
        let entry = self.entries.read().await.get(&document_id).cloned()?;
        let entry = entry.lock().await;
        Some((entry.replica.head_server_seq(), entry.replica.encode_full_state()))
    }

    /// Number of documents currently hydrated in the registry.
    pub async fn active_replica_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Replicas whose update backlog crosses `threshold`, ordered by
    /// backlog size descending — fed to the compaction worker.
    pub async fn compaction_candidates(&self, threshold: i64) -> Vec<CompactionCandidate> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let mut candidates = Vec::new();

        for (document_id, entry) in entries.iter() {
            let entry = entry.lock().await;
            if entry.updates_since_snapshot >= threshold {
                candidates.push(CompactionCandidate {
                    document_id: *document_id,
                    updates_since_snapshot: entry.updates_since_snapshot,
                    idle_for: now.duration_since(entry.last_touched),
                });
            }
        }

        candidates.sort_by(|a, b| b.updates_since_snapshot.cmp(&a.updates_since_snapshot));
        candidates
    }

    /// Snapshot the current replica state and truncate the log,
    /// resetting the backlog counter.
    pub async fn compact(&self, document_id: Uuid) -> Result<()> {
        async {
            let Some(entry) = self.entries.read().await.get(&document_id).cloned() else {
                return Ok(());
            };
            let mut entry = entry.lock().await;
            let server_seq = entry.replica.head_server_seq();
            let payload = entry.replica.encode_full_state();

            self.snapshot_store
                .save(document_id, server_seq, payload)
                .await
                .context("failed to persist compacted snapshot")?;
            self.log_store
                .truncate_up_to(document_id, server_seq)
                .await
                .context("failed to truncate log after compaction")?;

            entry.updates_since_snapshot = 0;
            Ok(())
        }
        .instrument(info_span!("relay.registry.compact", document_id = %document_id))
        .await
    }

    /// Drop replicas with no subscribers that have been idle past `idle_ttl`.
    pub async fn evict_idle(&self, idle_ttl: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        let mut evicted = Vec::new();
        let mut entries = self.entries.write().await;
        let mut idle_ids = Vec::new();

        for (document_id, entry) in entries.iter() {
            let entry = entry.lock().await;
            if entry.subscribers == 0 && now.duration_since(entry.last_touched) >= idle_ttl {
                idle_ids.push(*document_id);
            }
        }

        for document_id in idle_ids {
            entries.remove(&document_id);
            evicted.push(document_id);
        }

        evicted
    }
}
