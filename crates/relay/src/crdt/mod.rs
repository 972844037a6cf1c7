// Pure CRDT algebra: hydrate, encode, diff, merge. No I/O.

pub mod engine;

pub use engine::{CrdtEngineError, Replica};
