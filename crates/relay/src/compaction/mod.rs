// Background compaction worker.
//
// Runs on a fixed tick and asks `ReplicaRegistry::compaction_candidates`
// which documents have outgrown their update-log backlog, since candidacy
// here is a property of the in-memory replica's backlog counter rather
// than a join over a persisted update table.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

use crate::metrics;
use crate::registry::ReplicaRegistry;

/// Snapshot a document once its update backlog crosses this size.
pub const SNAPSHOT_THRESHOLD_UPDATES: i64 = 200;

/// At most this many documents are compacted per tick, so one tick
/// can't starve the worker loop if many documents are hot at once.
pub const MAX_COMPACTIONS_PER_TICK: usize = 10;

pub struct CompactionWorker {
    registry: Arc<ReplicaRegistry>,
    interval: Duration,
    threshold: i64,
}

impl CompactionWorker {
    pub fn new(registry: Arc<ReplicaRegistry>, interval: Duration, threshold: i64) -> Self {
        Self { registry, interval, threshold }
    }

    /// Run until `shutdown` fires, compacting eligible documents on
    /// every tick of `interval`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("compaction worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Compact up to `MAX_COMPACTIONS_PER_TICK` eligible documents,
    /// highest backlog first.
    pub async fn run_once(&self) {
        async {
            metrics::set_active_replicas(self.registry.active_replica_count().await);

            let candidates = self.registry.compaction_candidates(self.threshold).await;
            if candidates.is_empty() {
                return;
            }

            for candidate in candidates.into_iter().take(MAX_COMPACTIONS_PER_TICK) {
                let span = info_span!(
                    "relay.compaction.document",
                    document_id = %candidate.document_id,
                    updates_since_snapshot = candidate.updates_since_snapshot
                );
                async {
                    if let Err(error) = self.registry.compact(candidate.document_id).await {
                        warn!(document_id = %candidate.document_id, %error, "snapshot compaction failed");
                        metrics::increment_compaction_runs_total(false);
                    } else {
                        info!(document_id = %candidate.document_id, "snapshot compaction complete");
                        metrics::increment_compaction_runs_total(true);
                    }
                }
                .instrument(span)
                .await;
            }
        }
        .instrument(info_span!("relay.compaction.tick"))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::store::log::LogStore;
    use crate::store::snapshot::SnapshotStore;
    use uuid::Uuid;
    use yrs::{Doc, Text, Transact};

    fn test_registry() -> Arc<ReplicaRegistry> {
        let log_store = LogStore::in_memory();
        let snapshot_store = Arc::new(SnapshotStore::in_memory(MemoryBlobStore::new(), 1024 * 1024));
        Arc::new(ReplicaRegistry::new(log_store, snapshot_store))
    }

    fn encode_insert_update(insert_at: u32, inserted_text: &str) -> Vec<u8> {
        let base_doc = Doc::with_options(yrs::Options { client_id: 7, ..Default::default() });
        let updated_doc = Doc::with_options(yrs::Options { client_id: 7, ..Default::default() });
        {
            let text = updated_doc.get_or_insert_text("content");
            let mut txn = updated_doc.transact_mut();
            text.insert(&mut txn, insert_at, inserted_text);
        }
        let base_state_vector = base_doc.transact().state_vector();
        updated_doc.transact().encode_diff_v1(&base_state_vector)
    }

    #[tokio::test]
    async fn run_once_compacts_documents_past_threshold() {
        let registry = test_registry();
        let document_id = Uuid::new_v4();
        registry.acquire(document_id).await.unwrap();

        for index in 0..3 {
            let payload = encode_insert_update(index, "x");
            registry
                .apply_client_update(document_id, Uuid::new_v4(), Uuid::new_v4(), 0, payload)
                .await
                .unwrap();
        }

        let worker = CompactionWorker::new(registry.clone(), Duration::from_secs(30), 3);
        worker.run_once().await;

        assert!(registry.compaction_candidates(3).await.is_empty());
    }

    #[tokio::test]
    async fn run_once_ignores_documents_below_threshold() {
        let registry = test_registry();
        let document_id = Uuid::new_v4();
        registry.acquire(document_id).await.unwrap();
        let payload = encode_insert_update(0, "x");
        registry
            .apply_client_update(document_id, Uuid::new_v4(), Uuid::new_v4(), 0, payload)
            .await
            .unwrap();

        let worker = CompactionWorker::new(registry.clone(), Duration::from_secs(30), 200);
        worker.run_once().await;

        assert_eq!(registry.updates_since(document_id, 0).await.unwrap().len(), 1);
    }
}
