use crate::error::Result;
use crate::schema::MIG_0001_INIT;
use regex::RegexBuilder;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection};
use spiderfoot_core::event_types;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to the scan database. Each thread opens its own.
pub struct Db {
    pub conn: Connection,
}

impl Db {
    /// Alias of [`Db::open_or_create`] for readers.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_or_create(path)
    }

    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        register_functions(&conn)?;
        migrate(&conn)?;
        Ok(Db { conn })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "mmap_size", 268435456i64)?; // 256 MiB
    conn.pragma_update(None, "cache_size", -65536i64)?; // 64 MiB
    Ok(())
}

/// `X REGEXP Y` is evaluated as `regexp(Y, X)`: pattern first. Matches are
/// anchored at the start, case-insensitive, with `.` spanning newlines.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: Option<String> = ctx.get(1)?;
            Ok(regex_match(&pattern, text.as_deref().unwrap_or("")))
        },
    )?;
    Ok(())
}

pub(crate) fn regex_match(pattern: &str, text: &str) -> bool {
    RegexBuilder::new(&format!("^(?:{pattern})"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn migrate(conn: &Connection) -> Result<()> {
    // naive: if the scan table doesn't exist, apply 0001
    let exists: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='tbl_scan_instance'",
        [],
        |r| r.get(0),
    )?;
    if exists == 0 {
        conn.execute_batch(MIG_0001_INIT)?;
    }
    populate_event_types(conn)
}

/// Built-in types are added if missing; rows added by hand are kept.
fn populate_event_types(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO tbl_event_types (event, event_descr, event_raw, event_type) VALUES (?,?,?,?)",
        )?;
        for t in event_types::all() {
            stmt.execute(params![t.name, t.description, t.raw as i64, t.kind.as_str()])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_is_anchored_and_case_insensitive() {
        assert!(regex_match("abc", "ABCdef"));
        assert!(!regex_match("bcd", "abcdef"));
        assert!(regex_match(".*def", "abc\ndef"));
        assert!(!regex_match("(", "anything"));
    }

    #[test]
    fn creates_schema_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sf.db");
        let db = Db::open_or_create(&path).unwrap();
        let n: i64 = db.conn.query_row("SELECT COUNT(*) FROM tbl_event_types", [], |r| r.get(0)).unwrap();
        assert_eq!(n as usize, event_types::all().len());
        drop(db);
        let db = Db::open_or_create(&path).unwrap();
        assert!(db.table_exists("tbl_scan_results").unwrap());
        let hit: bool = db
            .conn
            .query_row("SELECT 'www.example.net' REGEXP '.*example'", [], |r| r.get(0))
            .unwrap();
        assert!(hit);
    }
}
