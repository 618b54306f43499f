//! Membership row and anchor model.
//!
//! # Responsibility
//! - Define the membership read model persisted by the ordering store.
//! - Express insert/move targets as a closed set of anchors.
//!
//! # Invariants
//! - `added_at` is set once at creation and never rewritten.
//! - `position` carries relative meaning only; renumbering may rewrite it.
//! - An anchor references exactly one neighbor, or none (tail).

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Playlist identity owned by the playlist-management collaborator.
pub type CollectionId = i64;

/// Track identity owned by the catalog collaborator.
pub type ItemId = i64;

/// Caller identity, passed through opaquely for event attribution.
pub type ActorId = i64;

/// Sort key inside one collection.
pub type Position = i64;

/// Membership read model: "item X is in collection C at position P".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRow {
    pub collection_id: CollectionId,
    pub item_id: ItemId,
    pub position: Position,
    /// Epoch ms creation timestamp.
    pub added_at: i64,
}

/// Placement target for single insert and reorder operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "item_id")]
pub enum Anchor {
    /// Place immediately before the referenced member.
    Before(ItemId),
    /// Place immediately after the referenced member.
    After(ItemId),
    /// Place after the current last member.
    Tail,
}

impl Anchor {
    /// Builds an anchor from optional `before`/`after` request fields.
    ///
    /// # Errors
    /// - Returns [`AnchorConflict`] when both fields are present.
    pub fn from_parts(
        before: Option<ItemId>,
        after: Option<ItemId>,
    ) -> Result<Self, AnchorConflict> {
        match (before, after) {
            (Some(before), Some(after)) => Err(AnchorConflict { before, after }),
            (Some(before), None) => Ok(Self::Before(before)),
            (None, Some(after)) => Ok(Self::After(after)),
            (None, None) => Ok(Self::Tail),
        }
    }

    /// Returns the referenced member, if any.
    pub fn reference(self) -> Option<ItemId> {
        match self {
            Self::Before(item_id) | Self::After(item_id) => Some(item_id),
            Self::Tail => None,
        }
    }
}

impl Display for Anchor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before(item_id) => write!(f, "before:{item_id}"),
            Self::After(item_id) => write!(f, "after:{item_id}"),
            Self::Tail => write!(f, "tail"),
        }
    }
}

/// Both `before` and `after` were supplied for one placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorConflict {
    pub before: ItemId,
    pub after: ItemId,
}

/// End of the collection that a bulk insert grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertAt {
    Head,
    #[default]
    Tail,
}

impl InsertAt {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Tail => "tail",
        }
    }
}

/// Denormalized catalog attributes joined into listings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemAttributes {
    pub title: String,
    pub duration_secs: Option<u64>,
    pub album: Option<String>,
    pub contributor: Option<String>,
}
