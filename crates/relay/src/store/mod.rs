// Durable storage for CRDT state: the append-only update log and the
// compacted snapshot store.

pub mod log;
pub mod snapshot;

pub use log::LogStore;
pub use snapshot::SnapshotStore;
