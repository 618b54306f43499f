//! Ordered-membership engine for playlists.
//!
//! Keeps a strict, collision-free order of items inside a collection under
//! fine-grained insert/move/remove, using spaced integer positions and
//! occasional renumbering instead of full-list rewrites.

pub mod config;
pub mod db;
pub mod events;
pub mod logging;
pub mod model;
pub mod ordering;
pub mod repo;
pub mod service;

pub use config::{ConfigError, OrderingConfig};
pub use events::{
    EventSinkError, MemberEvent, MemberEventKind, MemberEventSink, NoopEventSink,
    RecordingEventSink,
};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::member::{
    ActorId, Anchor, AnchorConflict, CollectionId, InsertAt, ItemAttributes, ItemId, MemberRow,
    Position,
};
pub use ordering::position::{compute_position, NeedsRenumber, STEP};
pub use repo::catalog_repo::{
    CatalogRepoError, CatalogRepoResult, CatalogRepository, SqliteCatalogRepository,
};
pub use repo::listing::{
    MemberFilter, MemberListQuery, MemberListing, MemberPage, MemberSort, MemberSortKey,
    SortDirection,
};
pub use repo::member_repo::{
    MemberRepoError, MemberRepoResult, MemberRepository, SqliteMemberRepository,
};
pub use service::ordering_service::{InvalidAnchorReason, OrderingError, OrderingService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
