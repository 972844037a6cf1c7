// Shared CRDT attribution types used by the relay's replica engine.

pub mod origin;

pub use origin::{AuthorType, OriginTag};
