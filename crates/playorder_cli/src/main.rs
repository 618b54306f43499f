//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `playorder_core` linkage.
//! - Run one insert/reorder/list round against a real store.
//!
//! Usage: `playorder_cli [DB_PATH]`. Without a path an in-memory store is
//! used. Set `PLAYORDER_LOG_DIR` to an absolute directory to enable file logs.

use log::info;
use playorder_core::db::{open_db, open_db_in_memory};
use playorder_core::{
    default_log_level, init_logging, Anchor, CatalogRepository, InsertAt, MemberListQuery,
    OrderingService, SqliteCatalogRepository, SqliteMemberRepository,
};
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("playorder_cli error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("PLAYORDER_LOG_DIR") {
        init_logging(default_log_level(), &log_dir)?;
    }
    println!("playorder_core version={}", playorder_core::core_version());

    let conn = match std::env::args().nth(1) {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let playlist = SqliteCatalogRepository::new(&conn).create_collection("smoke")?;
    let service = OrderingService::new(SqliteMemberRepository::try_new(&conn)?);

    service.add_bulk(playlist, &[1, 2, 3], InsertAt::Tail, 0)?;
    service.add_one(playlist, 4, Anchor::Before(2), 0)?;
    service.reorder(playlist, 3, Anchor::After(1), 0)?;

    let page = service.list(playlist, &MemberListQuery::default())?;
    info!(
        "event=cli_smoke module=cli status=ok collection_id={} members={}",
        playlist, page.total
    );
    for listing in &page.items {
        println!(
            "collection={} item={} position={}",
            playlist, listing.member.item_id, listing.member.position
        );
    }
    Ok(())
}
