//! Ordering engine use-case service.
//!
//! # Responsibility
//! - Compute positions for insert, bulk insert and reorder requests.
//! - Recover from exhausted gaps by renumbering the collection once.
//! - Wrap every mutation in one store transaction with bounded conflict retry.
//! - Publish membership notifications after commit.
//!
//! # Invariants
//! - Positions stay pairwise distinct within a collection.
//! - Renumbering never changes logical order.
//! - Inserting an existing member is a no-op; removing a non-member fails.
//! - Callers never observe `NeedsRenumber`.

use crate::config::{ConfigError, OrderingConfig};
use crate::events::{MemberEvent, MemberEventKind, MemberEventSink, NoopEventSink};
use crate::model::member::{
    ActorId, Anchor, AnchorConflict, CollectionId, InsertAt, ItemId, MemberRow, Position,
};
use crate::ordering::position::{
    compute_position, head_positions, renumbered_positions, tail_positions,
};
use crate::repo::listing::{MemberListQuery, MemberPage};
use crate::repo::member_repo::{MemberRepoError, MemberRepository};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Why an anchor or bulk request was rejected before touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidAnchorReason {
    /// `before` and `after` were both supplied.
    BothAnchors { before: ItemId, after: ItemId },
    /// A member was asked to move relative to itself.
    SelfReference(ItemId),
    /// Bulk insert received no items.
    EmptyItemList,
}

/// Errors from ordering engine operations.
#[derive(Debug)]
pub enum OrderingError {
    /// Collection is unknown to the playlist collaborator.
    CollectionNotFound(CollectionId),
    /// Anchor item is not a member of the collection.
    ReferenceNotFound {
        collection_id: CollectionId,
        item_id: ItemId,
    },
    /// Target item is not a member of the collection.
    NotFound {
        collection_id: CollectionId,
        item_id: ItemId,
    },
    /// Request shape rejected before any store access.
    InvalidAnchor(InvalidAnchorReason),
    /// Concurrent writers kept colliding after all retries.
    WriteConflict { attempts: u32 },
    /// Position arithmetic would leave the `i64` range.
    PositionOverflow(CollectionId),
    /// Internal consistency check failed.
    InvariantViolation(&'static str),
    /// Engine configuration rejected.
    Config(ConfigError),
    /// Repository-level failure.
    Repo(MemberRepoError),
}

impl OrderingError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Repo(err) if err.is_retryable())
    }
}

impl Display for OrderingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CollectionNotFound(id) => write!(f, "collection not found: {id}"),
            Self::ReferenceNotFound {
                collection_id,
                item_id,
            } => write!(
                f,
                "anchor item {item_id} is not a member of collection {collection_id}"
            ),
            Self::NotFound {
                collection_id,
                item_id,
            } => write!(
                f,
                "item {item_id} is not a member of collection {collection_id}"
            ),
            Self::InvalidAnchor(InvalidAnchorReason::BothAnchors { before, after }) => write!(
                f,
                "ambiguous anchor: both before={before} and after={after} supplied"
            ),
            Self::InvalidAnchor(InvalidAnchorReason::SelfReference(item_id)) => {
                write!(f, "item {item_id} cannot be anchored to itself")
            }
            Self::InvalidAnchor(InvalidAnchorReason::EmptyItemList) => {
                write!(f, "bulk insert requires at least one item")
            }
            Self::WriteConflict { attempts } => {
                write!(f, "write conflict persisted after {attempts} attempts")
            }
            Self::PositionOverflow(id) => {
                write!(f, "position space exhausted in collection {id}")
            }
            Self::InvariantViolation(details) => write!(f, "ordering invariant violated: {details}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OrderingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MemberRepoError> for OrderingError {
    fn from(value: MemberRepoError) -> Self {
        match value {
            MemberRepoError::NotFound {
                collection_id,
                item_id,
            } => Self::NotFound {
                collection_id,
                item_id,
            },
            MemberRepoError::PositionOverflow(collection_id) => {
                Self::PositionOverflow(collection_id)
            }
            other => Self::Repo(other),
        }
    }
}

impl From<AnchorConflict> for OrderingError {
    fn from(value: AnchorConflict) -> Self {
        Self::InvalidAnchor(InvalidAnchorReason::BothAnchors {
            before: value.before,
            after: value.after,
        })
    }
}

impl From<ConfigError> for OrderingError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Ordering engine facade over an ordering store and an event sink.
pub struct OrderingService<R: MemberRepository, S: MemberEventSink = NoopEventSink> {
    repo: R,
    sink: S,
    config: OrderingConfig,
}

impl<R: MemberRepository> OrderingService<R, NoopEventSink> {
    /// Creates a service with default config and no event delivery.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            sink: NoopEventSink,
            config: OrderingConfig::default(),
        }
    }
}

impl<R: MemberRepository, S: MemberEventSink> OrderingService<R, S> {
    /// Creates a service from explicit parts.
    ///
    /// # Errors
    /// - Returns `Config` when `config` fails validation.
    pub fn with_parts(repo: R, sink: S, config: OrderingConfig) -> Result<Self, OrderingError> {
        config.validate()?;
        Ok(Self { repo, sink, config })
    }

    pub fn config(&self) -> &OrderingConfig {
        &self.config
    }

    /// Adds one item at the anchor. Returns the existing row unchanged when
    /// the item is already a member.
    pub fn add_one(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
        anchor: Anchor,
        actor_id: ActorId,
    ) -> Result<MemberRow, OrderingError> {
        let started_at = Instant::now();
        let (row, created) = self.run_write("member_add", collection_id, |repo| {
            if let Some(existing) = repo.get_member(collection_id, item_id)? {
                return Ok((existing, false));
            }
            let position = self.place(repo, collection_id, anchor)?;
            let row = repo.insert_member(collection_id, item_id, position)?;
            Ok((row, true))
        })?;

        info!(
            "event=member_add module=ordering status=ok collection_id={} item_id={} anchor={} position={} created={} duration_ms={}",
            collection_id,
            item_id,
            anchor,
            row.position,
            created,
            started_at.elapsed().as_millis()
        );
        if created {
            self.publish(MemberEventKind::Added, collection_id, item_id, actor_id);
        }
        Ok(row)
    }

    /// Adds many items at one end of the collection, skipping members that
    /// are already present. Returns how many rows were inserted.
    pub fn add_bulk(
        &self,
        collection_id: CollectionId,
        item_ids: &[ItemId],
        insert_at: InsertAt,
        actor_id: ActorId,
    ) -> Result<usize, OrderingError> {
        if item_ids.is_empty() {
            return Err(OrderingError::InvalidAnchor(
                InvalidAnchorReason::EmptyItemList,
            ));
        }

        let started_at = Instant::now();
        let step = self.config.step;
        let inserted = self.run_write("member_add_bulk", collection_id, |repo| {
            let mut seen = HashSet::with_capacity(item_ids.len());
            let mut fresh = Vec::with_capacity(item_ids.len());
            for item_id in item_ids {
                if !seen.insert(*item_id) {
                    continue;
                }
                if repo.get_member(collection_id, *item_id)?.is_none() {
                    fresh.push(*item_id);
                }
            }

            let positions = match insert_at {
                InsertAt::Tail => {
                    tail_positions(repo.max_position(collection_id)?, fresh.len(), step)
                }
                InsertAt::Head => {
                    head_positions(repo.min_position(collection_id)?, fresh.len(), step)
                }
            }
            .ok_or(OrderingError::PositionOverflow(collection_id))?;

            for (item_id, position) in fresh.iter().zip(positions) {
                repo.insert_member(collection_id, *item_id, position)?;
            }
            Ok(fresh)
        })?;

        info!(
            "event=member_add_bulk module=ordering status=ok collection_id={} insert_at={} requested={} inserted={} duration_ms={}",
            collection_id,
            insert_at.as_str(),
            item_ids.len(),
            inserted.len(),
            started_at.elapsed().as_millis()
        );
        for item_id in &inserted {
            self.publish(MemberEventKind::Added, collection_id, *item_id, actor_id);
        }
        Ok(inserted.len())
    }

    /// Moves an existing member to the anchor. A move that would not change
    /// the member's neighbors returns the row unchanged.
    pub fn reorder(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
        anchor: Anchor,
        actor_id: ActorId,
    ) -> Result<MemberRow, OrderingError> {
        if anchor.reference() == Some(item_id) {
            return Err(OrderingError::InvalidAnchor(
                InvalidAnchorReason::SelfReference(item_id),
            ));
        }

        let started_at = Instant::now();
        let (row, moved) = self.run_write("member_reorder", collection_id, |repo| {
            let current = repo.get_member(collection_id, item_id)?.ok_or(
                OrderingError::ReferenceNotFound {
                    collection_id,
                    item_id,
                },
            )?;
            if already_placed(repo, &current, anchor)? {
                return Ok((current, false));
            }

            let position = self.place(repo, collection_id, anchor)?;
            repo.set_position(collection_id, item_id, position)?;
            let row = repo.get_member(collection_id, item_id)?.ok_or(
                OrderingError::InvariantViolation("reordered member missing in read-back"),
            )?;
            Ok((row, true))
        })?;

        info!(
            "event=member_reorder module=ordering status=ok collection_id={} item_id={} anchor={} position={} moved={} duration_ms={}",
            collection_id,
            item_id,
            anchor,
            row.position,
            moved,
            started_at.elapsed().as_millis()
        );
        if moved {
            self.publish(MemberEventKind::Reordered, collection_id, item_id, actor_id);
        }
        Ok(row)
    }

    /// Removes one member. Removing a non-member fails with `NotFound`.
    pub fn remove(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
        actor_id: ActorId,
    ) -> Result<(), OrderingError> {
        self.run_write("member_remove", collection_id, |repo| {
            repo.delete_member(collection_id, item_id)
                .map_err(OrderingError::from)
        })?;

        info!(
            "event=member_remove module=ordering status=ok collection_id={} item_id={}",
            collection_id, item_id
        );
        self.publish(MemberEventKind::Removed, collection_id, item_id, actor_id);
        Ok(())
    }

    /// Lists members with filters, sort and pagination.
    pub fn list(
        &self,
        collection_id: CollectionId,
        query: &MemberListQuery,
    ) -> Result<MemberPage, OrderingError> {
        ensure_collection(&self.repo, collection_id)?;
        let page = self.repo.list_members(collection_id, query)?;
        debug!(
            "event=member_list module=ordering status=ok collection_id={} filters={} returned={} total={}",
            collection_id,
            query.filters.len(),
            page.items.len(),
            page.total
        );
        Ok(page)
    }

    /// Loads one membership row.
    pub fn get_member(
        &self,
        collection_id: CollectionId,
        item_id: ItemId,
    ) -> Result<Option<MemberRow>, OrderingError> {
        ensure_collection(&self.repo, collection_id)?;
        Ok(self.repo.get_member(collection_id, item_id)?)
    }

    /// Runs `op` in one write transaction, retrying on write conflicts.
    fn run_write<T, F>(
        &self,
        event: &'static str,
        collection_id: CollectionId,
        mut op: F,
    ) -> Result<T, OrderingError>
    where
        F: FnMut(&R) -> Result<T, OrderingError>,
    {
        let max_attempts = self.config.max_conflict_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.repo.in_write_tx(|repo| {
                ensure_collection(repo, collection_id)?;
                op(repo)
            });
            match result {
                Err(err) if err.is_retryable() => {
                    if attempt >= max_attempts {
                        error!(
                            "event={} module=ordering status=error collection_id={} attempts={} error_code=write_conflict error={}",
                            event, collection_id, attempt, err
                        );
                        return Err(OrderingError::WriteConflict { attempts: attempt });
                    }
                    warn!(
                        "event={} module=ordering status=retry collection_id={} attempt={} error={}",
                        event, collection_id, attempt, err
                    );
                }
                other => return other,
            }
        }
    }

    /// Resolves the anchor and computes a free position, renumbering at most once.
    fn place(
        &self,
        repo: &R,
        collection_id: CollectionId,
        anchor: Anchor,
    ) -> Result<Position, OrderingError> {
        let step = self.config.step;
        let (left, right) = resolve_bounds(repo, collection_id, anchor)?;
        match compute_position(left, right, step) {
            Ok(position) => Ok(position),
            Err(signal) => {
                debug!(
                    "event=position_exhausted module=ordering collection_id={} anchor={} detail={}",
                    collection_id, anchor, signal
                );
                self.renumber(repo, collection_id)?;
                let (left, right) = resolve_bounds(repo, collection_id, anchor)?;
                compute_position(left, right, step).map_err(|_| {
                    OrderingError::InvariantViolation("no free position right after renumbering")
                })
            }
        }
    }

    /// Reassigns `step, 2*step, ...` in current order, as one atomic batch.
    fn renumber(&self, repo: &R, collection_id: CollectionId) -> Result<usize, OrderingError> {
        let started_at = Instant::now();
        let ordered = repo.ordered_item_ids(collection_id)?;
        let positions = renumbered_positions(ordered.len(), self.config.step)
            .ok_or(OrderingError::PositionOverflow(collection_id))?;
        let updates: Vec<(ItemId, Position)> = ordered.into_iter().zip(positions).collect();
        repo.batch_set_positions(collection_id, &updates)?;

        info!(
            "event=renumber module=ordering status=ok collection_id={} members={} duration_ms={}",
            collection_id,
            updates.len(),
            started_at.elapsed().as_millis()
        );
        Ok(updates.len())
    }

    fn publish(
        &self,
        kind: MemberEventKind,
        collection_id: CollectionId,
        item_id: ItemId,
        actor_id: ActorId,
    ) {
        let event = MemberEvent::new(kind, collection_id, item_id, actor_id);
        if let Err(err) = self.sink.publish(&event) {
            warn!(
                "event=member_notify module=ordering status=error kind={} collection_id={} item_id={} error={}",
                kind.as_str(),
                collection_id,
                item_id,
                err
            );
        }
    }
}

fn ensure_collection<R: MemberRepository>(
    repo: &R,
    collection_id: CollectionId,
) -> Result<(), OrderingError> {
    if !repo.collection_exists(collection_id)? {
        return Err(OrderingError::CollectionNotFound(collection_id));
    }
    Ok(())
}

/// Left/right neighbor positions for an anchor.
fn resolve_bounds<R: MemberRepository>(
    repo: &R,
    collection_id: CollectionId,
    anchor: Anchor,
) -> Result<(Option<Position>, Option<Position>), OrderingError> {
    match anchor {
        Anchor::Before(reference) => {
            let right = load_reference(repo, collection_id, reference)?;
            let left = repo.neighbor_above(collection_id, right.position)?;
            Ok((left.map(|row| row.position), Some(right.position)))
        }
        Anchor::After(reference) => {
            let left = load_reference(repo, collection_id, reference)?;
            let right = repo.neighbor_below(collection_id, left.position)?;
            Ok((Some(left.position), right.map(|row| row.position)))
        }
        Anchor::Tail => Ok((repo.max_position(collection_id)?, None)),
    }
}

fn load_reference<R: MemberRepository>(
    repo: &R,
    collection_id: CollectionId,
    item_id: ItemId,
) -> Result<MemberRow, OrderingError> {
    repo.get_member(collection_id, item_id)?
        .ok_or(OrderingError::ReferenceNotFound {
            collection_id,
            item_id,
        })
}

/// Whether `member` already satisfies `anchor` relative to its neighbors.
fn already_placed<R: MemberRepository>(
    repo: &R,
    member: &MemberRow,
    anchor: Anchor,
) -> Result<bool, OrderingError> {
    let collection_id = member.collection_id;
    match anchor {
        Anchor::Before(reference) => {
            load_reference(repo, collection_id, reference)?;
            let next = repo.neighbor_below(collection_id, member.position)?;
            Ok(next.is_some_and(|row| row.item_id == reference))
        }
        Anchor::After(reference) => {
            load_reference(repo, collection_id, reference)?;
            let previous = repo.neighbor_above(collection_id, member.position)?;
            Ok(previous.is_some_and(|row| row.item_id == reference))
        }
        Anchor::Tail => Ok(repo
            .neighbor_below(collection_id, member.position)?
            .is_none()),
    }
}
