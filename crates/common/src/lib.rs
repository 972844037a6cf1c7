// scriptum-common: shared types and utilities for the Scriptum workspace

pub mod backlink;
pub mod crdt;
pub mod diff;
pub mod path;
pub mod protocol;
pub mod section;
pub mod types;
