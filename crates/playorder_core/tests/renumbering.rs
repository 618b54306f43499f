use playorder_core::db::open_db_in_memory;
use playorder_core::{
    Anchor, CatalogRepository, CollectionId, InsertAt, ItemId, MemberListQuery,
    MemberRepoError, MemberRepository, OrderingError, OrderingService,
    SqliteCatalogRepository, SqliteMemberRepository,
};
use proptest::prelude::*;
use proptest::sample::Index;
use proptest::test_runner::TestCaseError;
use rusqlite::{params, Connection};
use std::collections::HashSet;

const ACTOR: i64 = 1;

fn setup() -> (Connection, CollectionId) {
    let conn = open_db_in_memory().unwrap();
    let collection_id = SqliteCatalogRepository::new(&conn)
        .create_collection("Long mix")
        .unwrap();
    (conn, collection_id)
}

fn positions(conn: &Connection, collection_id: CollectionId) -> Vec<(ItemId, i64)> {
    let mut stmt = conn
        .prepare(
            "SELECT item_id, position
             FROM collection_members
             WHERE collection_id = ?1
             ORDER BY position ASC;",
        )
        .unwrap();
    let rows = stmt
        .query_map([collection_id], |row| {
            Ok((row.get::<_, ItemId>(0)?, row.get::<_, i64>(1)?))
        })
        .unwrap();
    rows.map(Result::unwrap).collect()
}

fn assert_distinct_positions(conn: &Connection, collection_id: CollectionId) {
    let rows = positions(conn, collection_id);
    let unique: HashSet<i64> = rows.iter().map(|(_, position)| *position).collect();
    assert_eq!(unique.len(), rows.len(), "duplicate positions: {rows:?}");
}

#[test]
fn repeated_inserts_at_same_gap_force_exactly_one_renumber() {
    let (conn, playlist) = setup();
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
    service
        .add_bulk(playlist, &[1, 2], InsertAt::Tail, ACTOR)
        .unwrap();

    // ceil(log2(1000)) + 1 insertions, always right after item 1.
    let inserted: Vec<ItemId> = (100..111).collect();
    for item_id in &inserted {
        service
            .add_one(playlist, *item_id, Anchor::After(1), ACTOR)
            .unwrap();
    }

    let rows = positions(&conn, playlist);
    let order: Vec<ItemId> = rows.iter().map(|(item_id, _)| *item_id).collect();
    let mut expected = vec![1];
    expected.extend(inserted.iter().rev());
    expected.push(2);
    assert_eq!(order, expected);

    // After one renumber everything sits on a step multiple except the two
    // midpoints inserted afterwards.
    let off_grid: Vec<i64> = rows
        .iter()
        .map(|(_, position)| *position)
        .filter(|position| position % 1000 != 0)
        .collect();
    assert_eq!(off_grid, vec![1250, 1500]);
    assert_eq!(rows.last().unwrap(), &(2, 11_000));
    assert_distinct_positions(&conn, playlist);
}

#[test]
fn renumbering_preserves_order_and_added_at() {
    let (conn, playlist) = setup();
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
    service
        .add_bulk(playlist, &[1, 2, 3], InsertAt::Tail, ACTOR)
        .unwrap();
    service
        .add_bulk(playlist, &[4, 5], InsertAt::Head, ACTOR)
        .unwrap();

    // Squeeze positions 1000 and 1001 next to each other by hand.
    conn.execute(
        "UPDATE collection_members SET position = 1001 WHERE collection_id = ?1 AND item_id = 2;",
        [playlist],
    )
    .unwrap();
    let before: Vec<(ItemId, i64)> = positions(&conn, playlist);
    let order_before: Vec<ItemId> = before.iter().map(|(item_id, _)| *item_id).collect();
    assert_eq!(order_before, vec![5, 4, 1, 2, 3]);
    let added_before = service.get_member(playlist, 3).unwrap().unwrap().added_at;

    let row = service
        .add_one(playlist, 9, Anchor::Before(2), ACTOR)
        .unwrap();

    let after = positions(&conn, playlist);
    let order_after: Vec<ItemId> = after.iter().map(|(item_id, _)| *item_id).collect();
    assert_eq!(order_after, vec![5, 4, 1, 9, 2, 3]);
    assert_eq!(row.position, 3500);
    assert_eq!(
        after
            .iter()
            .filter(|(item_id, _)| *item_id != 9)
            .map(|(_, position)| *position)
            .collect::<Vec<_>>(),
        vec![1000, 2000, 3000, 4000, 5000]
    );
    assert_eq!(
        service.get_member(playlist, 3).unwrap().unwrap().added_at,
        added_before
    );
}

#[test]
fn reorder_into_exhausted_gap_renumbers_and_moves() {
    let (conn, playlist) = setup();
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
    service
        .add_bulk(playlist, &[1, 2, 3], InsertAt::Tail, ACTOR)
        .unwrap();
    conn.execute(
        "UPDATE collection_members SET position = 1001 WHERE collection_id = ?1 AND item_id = 2;",
        [playlist],
    )
    .unwrap();

    let moved = service
        .reorder(playlist, 3, Anchor::After(1), ACTOR)
        .unwrap();
    assert_eq!(moved.position, 1500);

    let order: Vec<ItemId> = positions(&conn, playlist)
        .into_iter()
        .map(|(item_id, _)| item_id)
        .collect();
    assert_eq!(order, vec![1, 3, 2]);
    assert_distinct_positions(&conn, playlist);
}

#[test]
fn batch_set_positions_swaps_without_transient_collisions() {
    let (conn, playlist) = setup();
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
    service
        .add_bulk(playlist, &[1, 2], InsertAt::Tail, ACTOR)
        .unwrap();

    let repo = SqliteMemberRepository::try_new(&conn).unwrap();
    repo.batch_set_positions(playlist, &[(1, 2000), (2, 1000)])
        .unwrap();

    assert_eq!(positions(&conn, playlist), vec![(2, 1000), (1, 2000)]);
}

#[test]
fn batch_set_positions_is_all_or_nothing() {
    let (conn, playlist) = setup();
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
    service
        .add_bulk(playlist, &[1, 2], InsertAt::Tail, ACTOR)
        .unwrap();
    let before = positions(&conn, playlist);

    let repo = SqliteMemberRepository::try_new(&conn).unwrap();
    let err = repo
        .batch_set_positions(playlist, &[(1, 5000), (99, 6000)])
        .unwrap_err();
    assert!(matches!(err, MemberRepoError::NotFound { item_id: 99, .. }));
    assert_eq!(positions(&conn, playlist), before);

    let err = repo
        .batch_set_positions(playlist, &[(1, 7000), (2, 7000)])
        .unwrap_err();
    assert!(matches!(err, MemberRepoError::InvalidData(_)));
    assert_eq!(positions(&conn, playlist), before);
}

#[test]
fn tail_overflow_renumbers_then_appends() {
    let (conn, playlist) = setup();
    for (item_id, position) in [(1, i64::MAX - 10), (2, i64::MAX - 1)] {
        conn.execute(
            "INSERT INTO collection_members (collection_id, item_id, position) VALUES (?1, ?2, ?3);",
            params![playlist, item_id, position],
        )
        .unwrap();
    }
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());

    let row = service.add_one(playlist, 3, Anchor::Tail, ACTOR).unwrap();

    assert_eq!(row.position, 3000);
    assert_eq!(positions(&conn, playlist), vec![(1, 1000), (2, 2000), (3, 3000)]);
}

#[test]
fn head_overflow_renumbers_then_prepends() {
    let (conn, playlist) = setup();
    for (item_id, position) in [(1, i64::MIN + 1), (2, i64::MIN + 10)] {
        conn.execute(
            "INSERT INTO collection_members (collection_id, item_id, position) VALUES (?1, ?2, ?3);",
            params![playlist, item_id, position],
        )
        .unwrap();
    }
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());

    let row = service
        .add_one(playlist, 3, Anchor::Before(1), ACTOR)
        .unwrap();

    assert_eq!(row.position, 0);
    assert_eq!(positions(&conn, playlist), vec![(3, 0), (1, 1000), (2, 2000)]);
}

#[test]
fn batch_parks_below_when_top_of_range_is_taken() {
    let (conn, playlist) = setup();
    for (item_id, position) in [(1, 5), (2, i64::MAX)] {
        conn.execute(
            "INSERT INTO collection_members (collection_id, item_id, position) VALUES (?1, ?2, ?3);",
            params![playlist, item_id, position],
        )
        .unwrap();
    }

    let repo = SqliteMemberRepository::try_new(&conn).unwrap();
    repo.batch_set_positions(playlist, &[(2, 6), (1, i64::MAX)])
        .unwrap();

    assert_eq!(positions(&conn, playlist), vec![(2, 6), (1, i64::MAX)]);
}

#[test]
fn bulk_append_past_range_end_reports_overflow() {
    let (conn, playlist) = setup();
    conn.execute(
        "INSERT INTO collection_members (collection_id, item_id, position) VALUES (?1, 1, ?2);",
        params![playlist, i64::MAX - 1],
    )
    .unwrap();
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());

    let err = service
        .add_bulk(playlist, &[2, 3], InsertAt::Tail, ACTOR)
        .unwrap_err();

    assert!(matches!(err, OrderingError::PositionOverflow(id) if id == playlist));
    assert_eq!(positions(&conn, playlist), vec![(1, i64::MAX - 1)]);
}

#[derive(Debug, Clone, Copy)]
enum AnchorPick {
    Before,
    After,
    Tail,
}

#[derive(Debug, Clone)]
enum Op {
    Add { anchor: AnchorPick, reference: Index, hot: bool },
    Reorder { target: Index, anchor: AnchorPick, reference: Index, hot: bool },
    Remove { target: Index },
}

fn anchor_pick() -> impl Strategy<Value = AnchorPick> {
    prop_oneof![Just(AnchorPick::Before), Just(AnchorPick::After), Just(AnchorPick::Tail)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (anchor_pick(), any::<Index>(), any::<bool>())
            .prop_map(|(anchor, reference, hot)| Op::Add { anchor, reference, hot }),
        3 => (any::<Index>(), anchor_pick(), any::<Index>(), any::<bool>()).prop_map(
            |(target, anchor, reference, hot)| Op::Reorder { target, anchor, reference, hot }
        ),
        2 => any::<Index>().prop_map(|target| Op::Remove { target }),
    ]
}

/// Resolves a generated anchor against the current model. `hot` pins the
/// reference to the first candidate so one gap keeps getting split.
fn resolve_anchor(
    model: &[ItemId],
    exclude: Option<ItemId>,
    pick: AnchorPick,
    reference: &Index,
    hot: bool,
) -> Anchor {
    let candidates: Vec<ItemId> = model
        .iter()
        .copied()
        .filter(|id| Some(*id) != exclude)
        .collect();
    if candidates.is_empty() {
        return Anchor::Tail;
    }
    let reference = if hot {
        candidates[0]
    } else {
        candidates[reference.index(candidates.len())]
    };
    match pick {
        AnchorPick::Before => Anchor::Before(reference),
        AnchorPick::After => Anchor::After(reference),
        AnchorPick::Tail => Anchor::Tail,
    }
}

fn apply_to_model(model: &mut Vec<ItemId>, item_id: ItemId, anchor: Anchor) {
    let index = match anchor {
        Anchor::Before(reference) => position_of(model, reference),
        Anchor::After(reference) => position_of(model, reference) + 1,
        Anchor::Tail => model.len(),
    };
    model.insert(index, item_id);
}

fn position_of(model: &[ItemId], item_id: ItemId) -> usize {
    model
        .iter()
        .position(|id| *id == item_id)
        .expect("anchor should be in model")
}

fn check_distinct(conn: &Connection, collection_id: CollectionId) -> Result<(), TestCaseError> {
    let rows = positions(conn, collection_id);
    let unique: HashSet<i64> = rows.iter().map(|(_, position)| *position).collect();
    prop_assert_eq!(unique.len(), rows.len(), "duplicate positions: {:?}", rows);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        ..ProptestConfig::default()
    })]

    #[test]
    fn mixed_operations_keep_total_order_and_match_model(
        ops in prop::collection::vec(op(), 1..160),
    ) {
        let (conn, playlist) = setup();
        let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
        let mut model: Vec<ItemId> = Vec::new();
        let mut next_item: ItemId = 1;

        for op in &ops {
            match op {
                Op::Add { anchor, reference, hot } => {
                    let item_id = next_item;
                    next_item += 1;
                    let anchor = resolve_anchor(&model, None, *anchor, reference, *hot);
                    service.add_one(playlist, item_id, anchor, ACTOR).unwrap();
                    apply_to_model(&mut model, item_id, anchor);
                }
                Op::Reorder { target, anchor, reference, hot } => {
                    if model.len() < 2 {
                        continue;
                    }
                    let item_id = model[target.index(model.len())];
                    let anchor = resolve_anchor(&model, Some(item_id), *anchor, reference, *hot);
                    service.reorder(playlist, item_id, anchor, ACTOR).unwrap();
                    model.retain(|id| *id != item_id);
                    apply_to_model(&mut model, item_id, anchor);
                }
                Op::Remove { target } => {
                    if model.is_empty() {
                        continue;
                    }
                    let item_id = model[target.index(model.len())];
                    service.remove(playlist, item_id, ACTOR).unwrap();
                    model.retain(|id| *id != item_id);
                }
            }
            check_distinct(&conn, playlist)?;
        }

        let listed: Vec<ItemId> = service
            .list(
                playlist,
                &MemberListQuery {
                    limit: Some(500),
                    ..MemberListQuery::default()
                },
            )
            .unwrap()
            .items
            .into_iter()
            .map(|listing| listing.member.item_id)
            .collect();
        prop_assert_eq!(listed, model);
    }
}
