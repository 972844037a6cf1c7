// Append-only CRDT update log.
//
// Batched idempotent inserts (`ON CONFLICT ... DO NOTHING` keyed by
// client_update_id) feed an ordered update-range query on read. Ordering
// is by `created_at`, tie-broken by the table's monotonic insertion id
// so replay is deterministic even when a batch lands in the same
// millisecond.
//
// `append` is synchronous with respect to the caller: a failure here is
// fatal to the replica's in-flight operation, since an unpersisted
// update cannot be safely acknowledged to the client.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};
use tokio::sync::RwLock;
use tracing::{info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub document_id: Uuid,
    pub server_seq: i64,
    pub client_id: Uuid,
    pub client_update_id: Uuid,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StoredUpdate {
    pub server_seq: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
struct UpdateRow {
    server_seq: i64,
    payload: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
struct MaxSeqRow {
    document_id: Uuid,
    max_server_seq: i64,
}

#[derive(Clone)]
pub enum LogStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<Uuid, Vec<StoredUpdate>>>>),
}

impl LogStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Append a single sequenced update, fatal-to-caller on failure.
    pub async fn append(&self, update: PendingUpdate) -> Result<()> {
        self.append_batch(std::slice::from_ref(&update)).await
    }

    pub async fn append_batch(&self, updates: &[PendingUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        match self {
            Self::Postgres(pool) => {
                async {
                    let mut builder = QueryBuilder::<Postgres>::new(
                        "
                        INSERT INTO crdt_updates
                            (document_id, server_seq, client_id, client_update_id, payload)
                        ",
                    );

                    builder.push_values(updates, |mut row, update| {
                        row.push_bind(update.document_id)
                            .push_bind(update.server_seq)
                            .push_bind(update.client_id)
                            .push_bind(update.client_update_id)
                            .push_bind(update.payload.as_slice());
                    });

                    builder.push(
                        "
                        ON CONFLICT (document_id, client_id, client_update_id)
                        DO NOTHING
                        ",
                    );

                    builder
                        .build()
                        .execute(pool)
                        .instrument(info_span!(
                            "relay.db.query",
                            query = "append_crdt_updates",
                            update_count = updates.len()
                        ))
                        .await
                        .context("failed to append crdt updates to postgres")?;

                    Ok(())
                }
                .instrument(info_span!("relay.store.log.append_batch", update_count = updates.len()))
                .await
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                for update in updates {
                    let entry = store.entry(update.document_id).or_default();
                    if !entry.iter().any(|stored| stored.server_seq == update.server_seq) {
                        entry.push(StoredUpdate {
                            server_seq: update.server_seq,
                            payload: update.payload.clone(),
                        });
                        entry.sort_by_key(|stored| stored.server_seq);
                    }
                }
                Ok(())
            }
        }
    }

    /// All updates with `server_seq > since`, ordered ascending.
    pub async fn updates_since(&self, document_id: Uuid, since: i64) -> Result<Vec<StoredUpdate>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, UpdateRow>(
                    "
                    SELECT server_seq, payload
                    FROM crdt_updates
                    WHERE document_id = $1 AND server_seq > $2
                    ORDER BY created_at ASC, id ASC
                    ",
                )
                .bind(document_id)
                .bind(since)
                .fetch_all(pool)
                .instrument(info_span!("relay.db.query", query = "crdt_updates_since"))
                .await
                .context("failed to load crdt updates since server_seq")?;

                Ok(rows
                    .into_iter()
                    .map(|row| StoredUpdate { server_seq: row.server_seq, payload: row.payload })
                    .collect())
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .get(&document_id)
                .map(|entries| {
                    entries.iter().filter(|entry| entry.server_seq > since).cloned().collect()
                })
                .unwrap_or_default()),
        }
    }

    pub async fn max_server_seq(&self, document_id: Uuid) -> Result<Option<i64>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MaxSeqRow>(
                    "
                    SELECT document_id, MAX(server_seq) AS max_server_seq
                    FROM crdt_updates
                    WHERE document_id = $1
                    GROUP BY document_id
                    ",
                )
                .bind(document_id)
                .fetch_optional(pool)
                .instrument(info_span!("relay.db.query", query = "crdt_updates_max_server_seq"))
                .await
                .context("failed to load max server_seq for document")?;

                Ok(row.map(|row| row.max_server_seq))
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .get(&document_id)
                .and_then(|entries| entries.iter().map(|entry| entry.server_seq).max())),
        }
    }

    /// Delete updates at or below `server_seq`, used after a successful
    /// snapshot compaction to keep the log bounded.
    pub async fn truncate_up_to(&self, document_id: Uuid, server_seq: i64) -> Result<u64> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "DELETE FROM crdt_updates WHERE document_id = $1 AND server_seq <= $2",
                )
                .bind(document_id)
                .bind(server_seq)
                .execute(pool)
                .instrument(info_span!("relay.db.query", query = "truncate_crdt_updates"))
                .await
                .context("failed to truncate crdt update log")?;

                Ok(result.rows_affected())
            }
            Self::Memory(store) => {
                let mut store = store.write().await;
                let Some(entries) = store.get_mut(&document_id) else {
                    return Ok(0);
                };
                let before = entries.len();
                entries.retain(|entry| entry.server_seq > server_seq);
                Ok((before - entries.len()) as u64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(document_id: Uuid, server_seq: i64, payload: &[u8]) -> PendingUpdate {
        PendingUpdate {
            document_id,
            server_seq,
            client_id: Uuid::new_v4(),
            client_update_id: Uuid::new_v4(),
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn append_and_fetch_updates_since() {
        let store = LogStore::in_memory();
        let document_id = Uuid::new_v4();

        store.append(pending(document_id, 1, b"a")).await.unwrap();
        store.append(pending(document_id, 2, b"b")).await.unwrap();
        store.append(pending(document_id, 3, b"c")).await.unwrap();

        let since_one = store.updates_since(document_id, 1).await.unwrap();
        assert_eq!(since_one.len(), 2);
        assert_eq!(since_one[0].server_seq, 2);
        assert_eq!(since_one[1].server_seq, 3);
    }

    #[tokio::test]
    async fn max_server_seq_tracks_highest_append() {
        let store = LogStore::in_memory();
        let document_id = Uuid::new_v4();

        assert_eq!(store.max_server_seq(document_id).await.unwrap(), None);

        store.append(pending(document_id, 5, b"a")).await.unwrap();
        store.append(pending(document_id, 9, b"b")).await.unwrap();

        assert_eq!(store.max_server_seq(document_id).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn truncate_up_to_removes_compacted_updates() {
        let store = LogStore::in_memory();
        let document_id = Uuid::new_v4();

        store.append(pending(document_id, 1, b"a")).await.unwrap();
        store.append(pending(document_id, 2, b"b")).await.unwrap();
        store.append(pending(document_id, 3, b"c")).await.unwrap();

        let deleted = store.truncate_up_to(document_id, 2).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.updates_since(document_id, 0).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].server_seq, 3);
    }

    #[tokio::test]
    async fn append_is_idempotent_on_duplicate_server_seq() {
        let store = LogStore::in_memory();
        let document_id = Uuid::new_v4();

        store.append(pending(document_id, 1, b"a")).await.unwrap();
        store.append(pending(document_id, 1, b"a-retry")).await.unwrap();

        let updates = store.updates_since(document_id, 0).await.unwrap();
        assert_eq!(updates.len(), 1);
    }
}
