//! Collaborator-owned collection and catalog tables.
//!
//! # Responsibility
//! - Register collections so the engine's existence check can succeed.
//! - Maintain denormalized item attributes joined by member listings.
//!
//! The ordering engine never writes here; hosts and tests stand in for the
//! playlist and catalog owners through this repository.

use crate::db::DbError;
use crate::model::member::{CollectionId, ItemAttributes, ItemId};
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CatalogRepoResult<T> = Result<T, CatalogRepoError>;

#[derive(Debug)]
pub enum CatalogRepoError {
    Db(DbError),
    CollectionNotFound(CollectionId),
    /// Title is blank after trim.
    InvalidTitle,
}

impl Display for CatalogRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::CollectionNotFound(id) => write!(f, "collection not found: {id}"),
            Self::InvalidTitle => write!(f, "title must not be blank"),
        }
    }
}

impl Error for CatalogRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::CollectionNotFound(_) => None,
            Self::InvalidTitle => None,
        }
    }
}

impl From<rusqlite::Error> for CatalogRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the collaborator-owned tables.
pub trait CatalogRepository {
    /// Creates one collection and returns its id.
    fn create_collection(&self, title: &str) -> CatalogRepoResult<CollectionId>;
    fn collection_exists(&self, collection_id: CollectionId) -> CatalogRepoResult<bool>;
    /// Deletes one collection together with all of its members.
    fn delete_collection(&self, collection_id: CollectionId) -> CatalogRepoResult<()>;
    /// Inserts or replaces attributes for one item.
    fn upsert_item(&self, item_id: ItemId, attributes: &ItemAttributes) -> CatalogRepoResult<()>;
    fn get_item(&self, item_id: ItemId) -> CatalogRepoResult<Option<ItemAttributes>>;
}

/// SQLite-backed collaborator tables.
pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn create_collection(&self, title: &str) -> CatalogRepoResult<CollectionId> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(CatalogRepoError::InvalidTitle);
        }
        self.conn
            .execute("INSERT INTO collections (title) VALUES (?1);", [trimmed])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn collection_exists(&self, collection_id: CollectionId) -> CatalogRepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM collections WHERE collection_id = ?1);",
            [collection_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn delete_collection(&self, collection_id: CollectionId) -> CatalogRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM collections WHERE collection_id = ?1;",
            [collection_id],
        )?;
        if changed == 0 {
            return Err(CatalogRepoError::CollectionNotFound(collection_id));
        }
        Ok(())
    }

    fn upsert_item(&self, item_id: ItemId, attributes: &ItemAttributes) -> CatalogRepoResult<()> {
        let title = attributes.title.trim();
        if title.is_empty() {
            return Err(CatalogRepoError::InvalidTitle);
        }
        self.conn.execute(
            "INSERT INTO catalog_items (item_id, title, duration_secs, album, contributor)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (item_id) DO UPDATE SET
                title = excluded.title,
                duration_secs = excluded.duration_secs,
                album = excluded.album,
                contributor = excluded.contributor;",
            params![
                item_id,
                title,
                attributes.duration_secs,
                attributes.album.as_deref(),
                attributes.contributor.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn get_item(&self, item_id: ItemId) -> CatalogRepoResult<Option<ItemAttributes>> {
        let item = self
            .conn
            .query_row(
                "SELECT title, duration_secs, album, contributor
                 FROM catalog_items
                 WHERE item_id = ?1;",
                [item_id],
                |row| {
                    Ok(ItemAttributes {
                        title: row.get("title")?,
                        duration_secs: row.get("duration_secs")?,
                        album: row.get("album")?,
                        contributor: row.get("contributor")?,
                    })
                },
            )
            .optional()?;
        Ok(item)
    }
}
