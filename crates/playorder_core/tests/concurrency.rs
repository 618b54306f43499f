use playorder_core::db::open_db;
use playorder_core::{
    Anchor, CatalogRepository, ItemId, OrderingConfig, OrderingError, OrderingService,
    RecordingEventSink, SqliteCatalogRepository, SqliteMemberRepository,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("playorder.sqlite3");
    (dir, path)
}

#[test]
fn concurrent_writers_on_one_collection_never_share_a_position() {
    let (_dir, path) = temp_db();
    let conn = open_db(&path).unwrap();
    let playlist = SqliteCatalogRepository::new(&conn)
        .create_collection("Shared")
        .unwrap();
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
    service.add_one(playlist, 1, Anchor::Tail, 0).unwrap();
    service.add_one(playlist, 2, Anchor::Tail, 0).unwrap();

    let workers: Vec<_> = [100, 200]
        .into_iter()
        .map(|base: ItemId| {
            let path = path.clone();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let service =
                    OrderingService::new(SqliteMemberRepository::try_new(&conn).unwrap());
                // Both writers aim at the same gap to force renumbering races.
                for offset in 0..30 {
                    service
                        .add_one(playlist, base + offset, Anchor::After(1), base)
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut stmt = conn
        .prepare(
            "SELECT item_id, position FROM collection_members
             WHERE collection_id = ?1
             ORDER BY position ASC;",
        )
        .unwrap();
    let rows: Vec<(ItemId, i64)> = stmt
        .query_map([playlist], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .map(Result::unwrap)
        .collect();

    assert_eq!(rows.len(), 62);
    let positions: HashSet<i64> = rows.iter().map(|(_, position)| *position).collect();
    assert_eq!(positions.len(), rows.len());
    assert_eq!(rows.first().map(|(item_id, _)| *item_id), Some(1));
    assert_eq!(rows.last().map(|(item_id, _)| *item_id), Some(2));
}

#[test]
fn held_write_lock_surfaces_write_conflict_after_retries() {
    let (_dir, path) = temp_db();
    let holder = open_db(&path).unwrap();
    let playlist = SqliteCatalogRepository::new(&holder)
        .create_collection("Locked")
        .unwrap();

    let conn = open_db(&path).unwrap();
    conn.busy_timeout(Duration::ZERO).unwrap();
    let sink = RecordingEventSink::new();
    let service = OrderingService::with_parts(
        SqliteMemberRepository::try_new(&conn).unwrap(),
        &sink,
        OrderingConfig::default(),
    )
    .unwrap();

    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let err = service
        .add_one(playlist, 1, Anchor::Tail, 0)
        .unwrap_err();
    assert!(matches!(err, OrderingError::WriteConflict { attempts: 4 }));
    assert!(sink.events().is_empty());

    holder.execute_batch("COMMIT;").unwrap();
    let row = service.add_one(playlist, 1, Anchor::Tail, 0).unwrap();
    assert_eq!(row.position, 1000);
    assert_eq!(sink.events().len(), 1);
}

#[test]
fn retry_budget_follows_config() {
    let (_dir, path) = temp_db();
    let holder = open_db(&path).unwrap();
    let playlist = SqliteCatalogRepository::new(&holder)
        .create_collection("Locked")
        .unwrap();

    let conn = open_db(&path).unwrap();
    conn.busy_timeout(Duration::ZERO).unwrap();
    let service = OrderingService::with_parts(
        SqliteMemberRepository::try_new(&conn).unwrap(),
        playorder_core::NoopEventSink,
        OrderingConfig {
            max_conflict_retries: 0,
            ..OrderingConfig::default()
        },
    )
    .unwrap();

    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let err = service.remove(playlist, 1, 0).unwrap_err();
    assert!(matches!(err, OrderingError::WriteConflict { attempts: 1 }));
    holder.execute_batch("ROLLBACK;").unwrap();
}
