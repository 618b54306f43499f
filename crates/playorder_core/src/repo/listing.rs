//! Listing query contract and SQL construction.
//!
//! # Responsibility
//! - Define the enumerated filter/sort/page contract for member listings.
//! - Translate that contract into bound SQL fragments for the store.
//!
//! # Invariants
//! - Filter values are always bound parameters, never interpolated.
//! - Every ordering ends with `item_id ASC` so pages are deterministic.
//! - Attribute filters only match members that have a catalog row.

use crate::db::functions::casefold;
use crate::model::member::{CollectionId, ItemAttributes, MemberRow};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

const MEMBERS_DEFAULT_LIMIT: u32 = 50;
const MEMBERS_LIMIT_MAX: u32 = 500;

/// Supported listing predicates over catalog attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum MemberFilter {
    /// Case-insensitive substring match on item title.
    TitleContains(String),
    /// Case-insensitive exact album match.
    Album(String),
    /// Case-insensitive exact contributor match.
    Contributor(String),
    /// Inclusive lower duration bound in seconds.
    MinDurationSecs(u32),
    /// Inclusive upper duration bound in seconds.
    MaxDurationSecs(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberSortKey {
    /// Canonical collection order.
    #[default]
    Position,
    /// Insertion history.
    AddedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberSort {
    pub key: MemberSortKey,
    pub direction: SortDirection,
}

/// Query options for member listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberListQuery {
    /// All filters must match.
    pub filters: Vec<MemberFilter>,
    pub sort: MemberSort,
    /// Maximum rows to return. Defaults to 50 and clamps to 500.
    pub limit: Option<u32>,
    /// Number of rows to skip.
    pub offset: u32,
}

/// One listed member with its catalog attributes, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberListing {
    pub member: MemberRow,
    pub attributes: Option<ItemAttributes>,
}

/// Page envelope returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPage {
    pub items: Vec<MemberListing>,
    /// Matching rows before pagination.
    pub total: u64,
    /// Effective normalized limit.
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

/// Normalizes list limit according to listing contract.
pub fn normalize_member_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => MEMBERS_DEFAULT_LIMIT,
        Some(value) if value > MEMBERS_LIMIT_MAX => MEMBERS_LIMIT_MAX,
        Some(value) => value,
    }
}

/// `WHERE` body plus its bind values, scoped to one collection.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FilterClause {
    pub sql: String,
    pub binds: Vec<Value>,
}

pub(crate) fn build_filter_clause(
    collection_id: CollectionId,
    filters: &[MemberFilter],
) -> FilterClause {
    let mut sql = String::from("m.collection_id = ?");
    let mut binds = vec![Value::Integer(collection_id)];

    for filter in filters {
        match filter {
            MemberFilter::TitleContains(needle) => {
                sql.push_str(" AND instr(casefold(ci.title), ?) > 0");
                binds.push(Value::Text(casefold(needle)));
            }
            MemberFilter::Album(album) => {
                sql.push_str(" AND casefold(ci.album) = ?");
                binds.push(Value::Text(casefold(album)));
            }
            MemberFilter::Contributor(contributor) => {
                sql.push_str(" AND casefold(ci.contributor) = ?");
                binds.push(Value::Text(casefold(contributor)));
            }
            MemberFilter::MinDurationSecs(secs) => {
                sql.push_str(" AND ci.duration_secs >= ?");
                binds.push(Value::Integer(i64::from(*secs)));
            }
            MemberFilter::MaxDurationSecs(secs) => {
                sql.push_str(" AND ci.duration_secs <= ?");
                binds.push(Value::Integer(i64::from(*secs)));
            }
        }
    }

    FilterClause { sql, binds }
}

pub(crate) fn order_by_clause(sort: MemberSort) -> &'static str {
    match (sort.key, sort.direction) {
        (MemberSortKey::Position, SortDirection::Asc) => "m.position ASC",
        (MemberSortKey::Position, SortDirection::Desc) => "m.position DESC",
        (MemberSortKey::AddedAt, SortDirection::Asc) => "m.added_at ASC, m.item_id ASC",
        (MemberSortKey::AddedAt, SortDirection::Desc) => "m.added_at DESC, m.item_id ASC",
    }
}

#[cfg(test)]
mod tests {
    use super::{
        build_filter_clause, normalize_member_limit, order_by_clause, MemberFilter, MemberSort,
        MemberSortKey, SortDirection,
    };
    use rusqlite::types::Value;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(normalize_member_limit(None), 50);
        assert_eq!(normalize_member_limit(Some(0)), 50);
        assert_eq!(normalize_member_limit(Some(20)), 20);
        assert_eq!(normalize_member_limit(Some(10_000)), 500);
    }

    #[test]
    fn filters_become_bound_predicates() {
        let clause = build_filter_clause(
            9,
            &[
                MemberFilter::TitleContains("Love".to_string()),
                MemberFilter::MaxDurationSecs(240),
            ],
        );
        assert_eq!(
            clause.sql,
            "m.collection_id = ? AND instr(casefold(ci.title), ?) > 0 AND ci.duration_secs <= ?"
        );
        assert_eq!(
            clause.binds,
            vec![
                Value::Integer(9),
                Value::Text("love".to_string()),
                Value::Integer(240),
            ]
        );
    }

    #[test]
    fn added_at_ordering_breaks_ties_by_item() {
        let sort = MemberSort {
            key: MemberSortKey::AddedAt,
            direction: SortDirection::Desc,
        };
        assert_eq!(order_by_clause(sort), "m.added_at DESC, m.item_id ASC");
        assert_eq!(order_by_clause(MemberSort::default()), "m.position ASC");
    }
}
