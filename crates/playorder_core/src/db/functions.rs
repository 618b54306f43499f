//! Application-defined SQL functions.
//!
//! # Invariants
//! - `casefold(NULL)` is `NULL`, so folded comparisons never match missing
//!   attributes.
//! - Folding is full Unicode lowercase; SQLite's own `lower()` and
//!   `NOCASE` only fold ASCII.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Lowercases text the same way on both sides of a listing comparison.
pub(crate) fn casefold(value: &str) -> String {
    value.to_lowercase()
}

/// Registers `casefold(text)` on `conn`. Re-registering replaces the
/// previous definition.
pub(crate) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.as_deref().map(casefold))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::register_functions;
    use rusqlite::Connection;

    #[test]
    fn casefold_folds_non_ascii_and_keeps_null() {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn).unwrap();

        let folded: String = conn
            .query_row("SELECT casefold('ÉDITH Piaf');", [], |row| row.get(0))
            .unwrap();
        assert_eq!(folded, "édith piaf");

        let missing: Option<String> = conn
            .query_row("SELECT casefold(NULL);", [], |row| row.get(0))
            .unwrap();
        assert_eq!(missing, None);
    }
}
