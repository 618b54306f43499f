//! Domain model for collection membership and ordering.
//!
//! # Responsibility
//! - Define the data structures shared by the store adapter and the engine.
//! - Keep collection/item identities opaque: they are owned by collaborators.
//!
//! # Invariants
//! - A membership row is identified by `(collection_id, item_id)`.
//! - Positions are only comparable within one collection.

pub mod member;
