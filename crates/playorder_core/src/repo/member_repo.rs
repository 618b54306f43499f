//! Ordering store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide point, neighbor and range reads over `collection_members`.
//! - Keep SQL and SQLite error classification inside the store boundary.
//! - Offer an explicit write-transaction boundary to the ordering engine.
//!
//! # Invariants
//! - Positions are pairwise distinct per collection (`UNIQUE` index backstop).
//! - `added_at` is written by the insert default and never updated.
//! - `batch_set_positions` is all-or-nothing.

use crate::db::functions::register_functions;
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::member::{CollectionId, ItemAttributes, ItemId, MemberRow, Position};
use crate::repo::listing::{
    build_filter_clause, normalize_member_limit, order_by_clause, MemberListQuery,
    MemberListing, MemberPage,
};
use crate::repo::{table_exists, table_has_column};
use rusqlite::types::Value;
use rusqlite::{
    ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

const MEMBER_SELECT_SQL: &str = "SELECT
    collection_id,
    item_id,
    position,
    added_at
FROM collection_members";

const BATCH_SAVEPOINT: &str = "batch_set_positions";

/// Result type used by ordering store operations.
pub type MemberRepoResult<T> = Result<T, MemberRepoError>;

/// Errors from ordering store operations.
#[derive(Debug)]
pub enum MemberRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target membership row does not exist.
    NotFound {
        collection_id: CollectionId,
        item_id: ItemId,
    },
    /// Membership row already exists.
    DuplicateMember {
        collection_id: CollectionId,
        item_id: ItemId,
    },
    /// Another member already holds the requested position.
    PositionConflict {
        collection_id: CollectionId,
        position: Position,
    },
    /// A competing writer holds the database lock.
    WriteConflict,
    /// Temporary parking range for a batch update would overflow.
    PositionOverflow(CollectionId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Input or persisted data violates the store contract.
    InvalidData(String),
}

impl MemberRepoError {
    /// Whether the failure came from a concurrent writer and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict | Self::PositionConflict { .. })
    }
}

impl Display for MemberRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound {
                collection_id,
                item_id,
            } => write!(
                f,
                "item {item_id} is not a member of collection {collection_id}"
            ),
            Self::DuplicateMember {
                collection_id,
                item_id,
            } => write!(
                f,
                "item {item_id} is already a member of collection {collection_id}"
            ),
            Self::PositionConflict {
                collection_id,
                position,
            } => write!(
                f,
                "position {position} is already taken in collection {collection_id}"
            ),
            Self::WriteConflict => write!(f, "database is locked by a concurrent writer"),
            Self::PositionOverflow(collection_id) => {
                write!(f, "position space exhausted in collection {collection_id}")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "member repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "member repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "member repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid member data: {message}"),
        }
    }
}

impl Error for MemberRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for MemberRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for MemberRepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_busy(&value) {
            return Self::WriteConflict;
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Ordering store interface consumed by the ordering engine.
pub trait MemberRepository {
    /// Returns whether the collection is known to the playlist collaborator.
    fn collection_exists(&self, collection_id: CollectionId) -> MemberRepoResult<bool>;
    /// Loads one membership row by key.
    fn get_member(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
    ) -> MemberRepoResult<Option<MemberRow>>;
    /// Smallest position in the collection.
    fn min_position(&self, collection_id: CollectionId) -> MemberRepoResult<Option<Position>>;
    /// Largest position in the collection.
    fn max_position(&self, collection_id: CollectionId) -> MemberRepoResult<Option<Position>>;
    /// Member with the largest position strictly less than `position`.
    fn neighbor_above(
        &self,
        collection_id: CollectionId,
        position: Position,
    ) -> MemberRepoResult<Option<MemberRow>>;
    /// Member with the smallest position strictly greater than `position`.
    fn neighbor_below(
        &self,
        collection_id: CollectionId,
        position: Position,
    ) -> MemberRepoResult<Option<MemberRow>>;
    /// Inserts one membership row; fails with `DuplicateMember` if present.
    fn insert_member(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
        position: Position,
    ) -> MemberRepoResult<MemberRow>;
    /// Rewrites one member position; fails with `NotFound` if absent.
    fn set_position(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
        position: Position,
    ) -> MemberRepoResult<()>;
    /// Deletes one membership row; fails with `NotFound` if absent.
    fn delete_member(&self, collection_id: CollectionId, item_id: ItemId)
        -> MemberRepoResult<()>;
    /// All member ids ordered by position ascending.
    fn ordered_item_ids(&self, collection_id: CollectionId) -> MemberRepoResult<Vec<ItemId>>;
    /// Filtered, sorted, paginated scan.
    fn list_members(
        &self,
        collection_id: CollectionId,
        query: &MemberListQuery,
    ) -> MemberRepoResult<MemberPage>;
    /// Rewrites many positions at once, all-or-nothing.
    fn batch_set_positions(
        &self,
        collection_id: CollectionId,
        updates: &[(ItemId, Position)],
    ) -> MemberRepoResult<()>;
    /// Runs `f` inside one write transaction, committing only on `Ok`.
    fn in_write_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<MemberRepoError>;
}

/// SQLite-backed ordering store.
pub struct SqliteMemberRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMemberRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> MemberRepoResult<Self> {
        ensure_member_connection_ready(conn)?;
        // Connections migrated outside `open_db` still need listing functions.
        register_functions(conn)?;
        Ok(Self { conn })
    }
}

impl MemberRepository for SqliteMemberRepository<'_> {
    fn collection_exists(&self, collection_id: CollectionId) -> MemberRepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM collections WHERE collection_id = ?1
            );",
            [collection_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn get_member(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
    ) -> MemberRepoResult<Option<MemberRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "{MEMBER_SELECT_SQL}
                     WHERE collection_id = ?1
                       AND item_id = ?2;"
                ),
                params![collection_id, item_id],
                parse_member_row,
            )
            .optional()?;
        Ok(row)
    }

    fn min_position(&self, collection_id: CollectionId) -> MemberRepoResult<Option<Position>> {
        min_position_in(self.conn, collection_id)
    }

    fn max_position(&self, collection_id: CollectionId) -> MemberRepoResult<Option<Position>> {
        max_position_in(self.conn, collection_id)
    }

    fn neighbor_above(
        &self,
        collection_id: CollectionId,
        position: Position,
    ) -> MemberRepoResult<Option<MemberRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "{MEMBER_SELECT_SQL}
                     WHERE collection_id = ?1
                       AND position < ?2
                     ORDER BY position DESC
                     LIMIT 1;"
                ),
                params![collection_id, position],
                parse_member_row,
            )
            .optional()?;
        Ok(row)
    }

    fn neighbor_below(
        &self,
        collection_id: CollectionId,
        position: Position,
    ) -> MemberRepoResult<Option<MemberRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "{MEMBER_SELECT_SQL}
                     WHERE collection_id = ?1
                       AND position > ?2
                     ORDER BY position ASC
                     LIMIT 1;"
                ),
                params![collection_id, position],
                parse_member_row,
            )
            .optional()?;
        Ok(row)
    }

    fn insert_member(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
        position: Position,
    ) -> MemberRepoResult<MemberRow> {
        self.conn
            .execute(
                "INSERT INTO collection_members (collection_id, item_id, position)
                 VALUES (?1, ?2, ?3);",
                params![collection_id, item_id, position],
            )
            .map_err(|err| match constraint_kind(&err) {
                Some(ConstraintKind::MemberKey) => MemberRepoError::DuplicateMember {
                    collection_id,
                    item_id,
                },
                Some(ConstraintKind::Position) => MemberRepoError::PositionConflict {
                    collection_id,
                    position,
                },
                None => err.into(),
            })?;

        self.get_member(collection_id, item_id)?
            .ok_or_else(|| {
                MemberRepoError::InvalidData(format!(
                    "inserted member {item_id} missing from collection {collection_id}"
                ))
            })
    }

    fn set_position(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
        position: Position,
    ) -> MemberRepoResult<()> {
        update_position(self.conn, collection_id, item_id, position)
    }

    fn delete_member(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
    ) -> MemberRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM collection_members
             WHERE collection_id = ?1
               AND item_id = ?2;",
            params![collection_id, item_id],
        )?;
        if changed == 0 {
            return Err(MemberRepoError::NotFound {
                collection_id,
                item_id,
            });
        }
        Ok(())
    }

    fn ordered_item_ids(&self, collection_id: CollectionId) -> MemberRepoResult<Vec<ItemId>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id
             FROM collection_members
             WHERE collection_id = ?1
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([collection_id])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    fn list_members(
        &self,
        collection_id: CollectionId,
        query: &MemberListQuery,
    ) -> MemberRepoResult<MemberPage> {
        let filter = build_filter_clause(collection_id, &query.filters);
        let limit = normalize_member_limit(query.limit);

        let total: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*)
                 FROM collection_members m
                 LEFT JOIN catalog_items ci ON ci.item_id = m.item_id
                 WHERE {};",
                filter.sql
            ),
            params_from_iter(filter.binds.iter()),
            |row| row.get(0),
        )?;
        let total = u64::try_from(total).map_err(|_| {
            MemberRepoError::InvalidData(format!("negative member count `{total}`"))
        })?;

        let sql = format!(
            "SELECT
                m.collection_id AS collection_id,
                m.item_id AS item_id,
                m.position AS position,
                m.added_at AS added_at,
                ci.item_id AS catalog_item_id,
                ci.title AS title,
                ci.duration_secs AS duration_secs,
                ci.album AS album,
                ci.contributor AS contributor
             FROM collection_members m
             LEFT JOIN catalog_items ci ON ci.item_id = m.item_id
             WHERE {}
             ORDER BY {}
             LIMIT ? OFFSET ?;",
            filter.sql,
            order_by_clause(query.sort)
        );
        let mut bind_values = filter.binds;
        bind_values.push(Value::Integer(i64::from(limit)));
        bind_values.push(Value::Integer(i64::from(query.offset)));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_listing_row(row)?);
        }

        let has_more = u64::from(query.offset) + (items.len() as u64) < total;
        Ok(MemberPage {
            items,
            total,
            limit,
            offset: query.offset,
            has_more,
        })
    }

    fn batch_set_positions(
        &self,
        collection_id: CollectionId,
        updates: &[(ItemId, Position)],
    ) -> MemberRepoResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut targets = HashSet::with_capacity(updates.len());
        for (_, position) in updates {
            if !targets.insert(*position) {
                return Err(MemberRepoError::InvalidData(format!(
                    "duplicate target position {position} in batch update"
                )));
            }
        }

        if self.conn.is_autocommit() {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            apply_position_batch(&tx, collection_id, updates)?;
            tx.commit()?;
            return Ok(());
        }

        // Already inside a caller transaction: scope the batch to a savepoint.
        self.conn
            .execute_batch(&format!("SAVEPOINT {BATCH_SAVEPOINT};"))?;
        match apply_position_batch(self.conn, collection_id, updates) {
            Ok(()) => {
                self.conn
                    .execute_batch(&format!("RELEASE {BATCH_SAVEPOINT};"))?;
                Ok(())
            }
            Err(err) => {
                self.conn.execute_batch(&format!(
                    "ROLLBACK TO {BATCH_SAVEPOINT}; RELEASE {BATCH_SAVEPOINT};"
                ))?;
                Err(err)
            }
        }
    }

    fn in_write_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<MemberRepoError>,
    {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|err| E::from(MemberRepoError::from(err)))?;
        // Dropping `tx` on the error path rolls the whole unit back.
        let value = f(self)?;
        tx.commit().map_err(|err| E::from(MemberRepoError::from(err)))?;
        Ok(value)
    }
}

/// Two-phase rewrite: park every target row outside all current and target
/// positions, then write final values. The unique position index never
/// observes a transient duplicate among the rewritten rows.
fn apply_position_batch(
    conn: &Connection,
    collection_id: CollectionId,
    updates: &[(ItemId, Position)],
) -> MemberRepoResult<()> {
    let parked = parking_positions(conn, collection_id, updates)?;
    for ((item_id, _), parked) in updates.iter().zip(parked) {
        update_position(conn, collection_id, *item_id, parked)?;
    }

    for (item_id, position) in updates {
        update_position(conn, collection_id, *item_id, *position)?;
    }
    Ok(())
}

/// Free slots above the highest current/target position, or below the lowest
/// one when the top of the `i64` range is taken.
fn parking_positions(
    conn: &Connection,
    collection_id: CollectionId,
    updates: &[(ItemId, Position)],
) -> MemberRepoResult<Vec<Position>> {
    let targets = updates.iter().map(|(_, position)| *position);
    let (Some(target_min), Some(target_max)) = (targets.clone().min(), targets.max()) else {
        return Ok(Vec::new());
    };
    let ceiling = max_position_in(conn, collection_id)?
        .map_or(target_max, |max| max.max(target_max));
    let floor = min_position_in(conn, collection_id)?
        .map_or(target_min, |min| min.min(target_min));

    let above: Option<Vec<Position>> = (1..=updates.len())
        .map(|offset| {
            i64::try_from(offset)
                .ok()
                .and_then(|offset| ceiling.checked_add(offset))
        })
        .collect();
    if let Some(parked) = above {
        return Ok(parked);
    }

    let below: Option<Vec<Position>> = (1..=updates.len())
        .map(|offset| {
            i64::try_from(offset)
                .ok()
                .and_then(|offset| floor.checked_sub(offset))
        })
        .collect();
    below.ok_or(MemberRepoError::PositionOverflow(collection_id))
}

fn update_position(
    conn: &Connection,
    collection_id: CollectionId,
    item_id: ItemId,
    position: Position,
) -> MemberRepoResult<()> {
    let changed = conn
        .execute(
            "UPDATE collection_members
             SET position = ?3
             WHERE collection_id = ?1
               AND item_id = ?2;",
            params![collection_id, item_id, position],
        )
        .map_err(|err| match constraint_kind(&err) {
            Some(ConstraintKind::Position) => MemberRepoError::PositionConflict {
                collection_id,
                position,
            },
            _ => err.into(),
        })?;
    if changed == 0 {
        return Err(MemberRepoError::NotFound {
            collection_id,
            item_id,
        });
    }
    Ok(())
}

fn min_position_in(
    conn: &Connection,
    collection_id: CollectionId,
) -> MemberRepoResult<Option<Position>> {
    let value = conn.query_row(
        "SELECT MIN(position)
         FROM collection_members
         WHERE collection_id = ?1;",
        [collection_id],
        |row| row.get(0),
    )?;
    Ok(value)
}

fn max_position_in(
    conn: &Connection,
    collection_id: CollectionId,
) -> MemberRepoResult<Option<Position>> {
    let value = conn.query_row(
        "SELECT MAX(position)
         FROM collection_members
         WHERE collection_id = ?1;",
        [collection_id],
        |row| row.get(0),
    )?;
    Ok(value)
}

fn parse_member_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        collection_id: row.get("collection_id")?,
        item_id: row.get("item_id")?,
        position: row.get("position")?,
        added_at: row.get("added_at")?,
    })
}

fn parse_listing_row(row: &Row<'_>) -> MemberRepoResult<MemberListing> {
    let member = parse_member_row(row)?;
    let attributes = match row.get::<_, Option<i64>>("catalog_item_id")? {
        None => None,
        Some(_) => Some(ItemAttributes {
            title: row.get("title")?,
            duration_secs: row.get("duration_secs")?,
            album: row.get("album")?,
            contributor: row.get("contributor")?,
        }),
    };
    Ok(MemberListing { member, attributes })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintKind {
    MemberKey,
    Position,
}

fn constraint_kind(err: &rusqlite::Error) -> Option<ConstraintKind> {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Some(ConstraintKind::MemberKey),
                ffi::SQLITE_CONSTRAINT_UNIQUE => Some(ConstraintKind::Position),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn ensure_member_connection_ready(conn: &Connection) -> MemberRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(MemberRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["collections", "catalog_items", "collection_members"] {
        if !table_exists(conn, table)? {
            return Err(MemberRepoError::MissingRequiredTable(table));
        }
    }

    for column in ["collection_id", "item_id", "position", "added_at"] {
        if !table_has_column(conn, "collection_members", column)? {
            return Err(MemberRepoError::MissingRequiredColumn {
                table: "collection_members",
                column,
            });
        }
    }

    Ok(())
}
