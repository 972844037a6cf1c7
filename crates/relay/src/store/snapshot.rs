// Compacted snapshot store.
//
// Exactly one physical form per snapshot: a snapshot row holds either
// `payload` (inline) or `blob_key` (object storage), never both — `save`
// transitions between the two forms and deletes whichever form it left
// behind. There is also only ever one current snapshot per document;
// `save` replaces it and the caller (the compaction worker) truncates
// the update log immediately afterward.

use std::sync::Arc;
use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::postgres::PgPool;
use tokio::sync::RwLock;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::blob::{snapshot_blob_key, BlobStore};

#[derive(Debug, Clone)]
pub struct CurrentSnapshot {
    pub server_seq: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    server_seq: i64,
    payload: Option<Vec<u8>>,
    blob_key: Option<String>,
}

#[derive(Debug, Clone)]
struct MemorySnapshot {
    server_seq: i64,
    inline: Option<Vec<u8>>,
    blob_key: Option<String>,
}

enum Backend {
    Postgres(PgPool),
    Memory(RwLock<HashMap<Uuid, MemorySnapshot>>),
}

pub struct SnapshotStore {
    backend: Backend,
    blob: Arc<dyn BlobStore>,
    /// Payloads at or above this size move into the blob store.
    size_limit_bytes: usize,
}

impl SnapshotStore {
    pub fn from_pool(pool: PgPool, blob: Arc<dyn BlobStore>, size_limit_bytes: usize) -> Self {
        Self { backend: Backend::Postgres(pool), blob, size_limit_bytes }
    }

    pub fn in_memory(blob: Arc<dyn BlobStore>, size_limit_bytes: usize) -> Self {
        Self { backend: Backend::Memory(RwLock::new(HashMap::new())), blob, size_limit_bytes }
    }

    pub async fn current(&self, document_id: Uuid) -> Result<Option<CurrentSnapshot>> {
        async {
            match &self.backend {
                Backend::Postgres(pool) => {
                    let row = sqlx::query_as::<_, SnapshotRow>(
                        "SELECT server_seq, payload, blob_key FROM crdt_snapshots WHERE document_id = $1",
                    )
                    .bind(document_id)
                    .fetch_optional(pool)
                    .instrument(info_span!("relay.db.query", query = "fetch_current_snapshot"))
                    .await
                    .context("failed to fetch current snapshot")?;

                    let Some(row) = row else { return Ok(None) };
                    self.materialize(row.server_seq, row.payload, row.blob_key).await
                }
                Backend::Memory(store) => {
                    let Some(entry) = store.read().await.get(&document_id).cloned() else {
                        return Ok(None);
                    };
                    self.materialize(entry.server_seq, entry.inline, entry.blob_key).await
                }
            }
        }
        .instrument(info_span!("relay.store.snapshot.current", document_id = %document_id))
        .await
    }

    async fn materialize(
        &self,
        server_seq: i64,
        inline: Option<Vec<u8>>,
        blob_key: Option<String>,
    ) -> Result<Option<CurrentSnapshot>> {
        if let Some(payload) = inline {
            return Ok(Some(CurrentSnapshot { server_seq, payload }));
        }
        let Some(key) = blob_key else { return Ok(None) };
        let payload = self
            .blob
            .get(&key)
            .await
            .with_context(|| format!("failed to fetch snapshot blob `{key}`"))?
            .with_context(|| format!("snapshot row references missing blob `{key}`"))?;
        Ok(Some(CurrentSnapshot { server_seq, payload }))
    }

    /// Persist a new current snapshot, replacing whatever form the
    /// previous one held.
    pub async fn save(&self, document_id: Uuid, server_seq: i64, payload: Vec<u8>) -> Result<()> {
        async {
            let use_blob = payload.len() >= self.size_limit_bytes;
            let key = snapshot_blob_key(document_id);

            if use_blob {
                self.blob
                    .put(&key, &payload)
                    .await
                    .with_context(|| format!("failed to upload snapshot blob `{key}`"))?;
            }

            let previous_form = match &self.backend {
                Backend::Postgres(pool) => {
                    let mut tx = pool
                        .begin()
                        .instrument(info_span!("relay.db.query", query = "begin_snapshot_save_tx"))
                        .await
                        .context("failed to open snapshot save transaction")?;

                    let previous = sqlx::query_as::<_, SnapshotRow>(
                        "SELECT server_seq, payload, blob_key FROM crdt_snapshots WHERE document_id = $1",
                    )
                    .bind(document_id)
                    .fetch_optional(&mut *tx)
                    .instrument(info_span!("relay.db.query", query = "fetch_previous_snapshot_form"))
                    .await
                    .context("failed to fetch previous snapshot form")?;

                    sqlx::query(
                        "
                        INSERT INTO crdt_snapshots (document_id, server_seq, payload, blob_key)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (document_id) DO UPDATE
                            SET server_seq = EXCLUDED.server_seq,
                                payload = EXCLUDED.payload,
                                blob_key = EXCLUDED.blob_key
                        ",
                    )
                    .bind(document_id)
                    .bind(server_seq)
                    .bind(if use_blob { None } else { Some(payload.as_slice()) })
                    .bind(if use_blob { Some(key.as_str()) } else { None })
                    .execute(&mut *tx)
                    .instrument(info_span!("relay.db.query", query = "upsert_current_snapshot"))
                    .await
                    .context("failed to persist current snapshot")?;

                    tx.commit()
                        .instrument(info_span!("relay.db.query", query = "commit_snapshot_save_tx"))
                        .await
                        .context("failed to commit snapshot save transaction")?;

                    previous.map(|row| row.blob_key)
                }
                Backend::Memory(store) => {
                    let mut store = store.write().await;
                    let previous = store.get(&document_id).and_then(|entry| entry.blob_key.clone());
                    store.insert(
                        document_id,
                        MemorySnapshot {
                            server_seq,
                            inline: (!use_blob).then(|| payload.clone()),
                            blob_key: use_blob.then(|| key.clone()),
                        },
                    );
                    Some(previous)
                }
            };

            // Drop the old physical form if it differed from the new one.
            if let Some(Some(old_key)) = previous_form {
                if !use_blob || old_key != key {
                    let _ = self.blob.delete(&old_key).await;
                }
            }

            Ok(())
        }
        .instrument(info_span!(
            "relay.store.snapshot.save",
            document_id = %document_id,
            server_seq,
            payload_bytes = payload.len()
        ))
        .await
    }
}
