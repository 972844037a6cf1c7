// Pure CRDT engine: wraps a `yrs::Doc` and the update log needed to
// rebuild it, with no I/O of its own.
//
// The engine only knows how to hydrate a document from bytes and apply
// further update bytes to it — loading those bytes from storage and
// caching the resulting `Replica` are the registry's job (see
// `registry`).

use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdtEngineError {
    InvalidSnapshotPayload,
    InvalidUpdatePayload { server_seq: i64 },
    BaseServerSeqAhead { base_server_seq: i64, head_server_seq: i64 },
    NonMonotonicServerSeq { server_seq: i64, head_server_seq: i64 },
}

impl std::fmt::Display for CrdtEngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSnapshotPayload => write!(f, "invalid CRDT snapshot payload"),
            Self::InvalidUpdatePayload { server_seq } => {
                write!(f, "invalid CRDT update payload at server_seq {server_seq}")
            }
            Self::BaseServerSeqAhead { base_server_seq, head_server_seq } => write!(
                f,
                "base_server_seq {base_server_seq} exceeds current head {head_server_seq}"
            ),
            Self::NonMonotonicServerSeq { server_seq, head_server_seq } => write!(
                f,
                "server_seq {server_seq} must be greater than current head {head_server_seq}"
            ),
        }
    }
}

impl std::error::Error for CrdtEngineError {}

/// A hydrated document replica: the live `yrs::Doc` plus the highest
/// server sequence number folded into it so far.
pub struct Replica {
    doc: Doc,
    head_server_seq: i64,
}

impl Replica {
    /// Build an empty replica with no history.
    pub fn empty() -> Self {
        Self { doc: Doc::new(), head_server_seq: 0 }
    }

    /// Hydrate a replica from an optional snapshot followed by any
    /// updates with `server_seq` greater than the snapshot's.
    pub fn hydrate(
        snapshot: Option<(i64, &[u8])>,
        updates: &[(i64, Vec<u8>)],
    ) -> Result<Self, CrdtEngineError> {
        let doc = Doc::new();
        let mut head_server_seq = 0;

        if let Some((snapshot_seq, payload)) = snapshot {
            apply_update_payload(&doc, payload).map_err(|_| CrdtEngineError::InvalidSnapshotPayload)?;
            head_server_seq = snapshot_seq;
        }

        let mut ordered = updates.to_vec();
        ordered.sort_by_key(|(server_seq, _)| *server_seq);

        for (server_seq, payload) in ordered {
            if server_seq <= head_server_seq {
                continue;
            }
            apply_update_payload(&doc, &payload)
                .map_err(|_| CrdtEngineError::InvalidUpdatePayload { server_seq })?;
            head_server_seq = server_seq;
        }

        Ok(Self { doc, head_server_seq })
    }

    pub fn head_server_seq(&self) -> i64 {
        self.head_server_seq
    }

    /// Apply an already-sequenced update, enforcing monotonicity against
    /// the replica's current head.
    pub fn apply(
        &mut self,
        base_server_seq: i64,
        server_seq: i64,
        payload: &[u8],
    ) -> Result<(), CrdtEngineError> {
        if base_server_seq > self.head_server_seq {
            return Err(CrdtEngineError::BaseServerSeqAhead {
                base_server_seq,
                head_server_seq: self.head_server_seq,
            });
        }
        if server_seq <= self.head_server_seq {
            return Err(CrdtEngineError::NonMonotonicServerSeq {
                server_seq,
                head_server_seq: self.head_server_seq,
            });
        }

        apply_update_payload(&self.doc, payload)
            .map_err(|_| CrdtEngineError::InvalidUpdatePayload { server_seq })?;
        self.head_server_seq = server_seq;
        Ok(())
    }

    /// Encode the full document state as a single update — used to
    /// build a fresh snapshot.
    pub fn encode_full_state(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }
}

fn apply_update_payload(doc: &Doc, payload: &[u8]) -> Result<(), ()> {
    let decoded = Update::decode_v1(payload).map_err(|_| ())?;
    doc.transact_mut().apply_update(decoded).map_err(|_| ())
}
