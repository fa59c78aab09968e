use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::error::CoreError;
use crate::migrations::MIGRATIONS;

pub struct ShadowDb {
    pub path: PathBuf,
    pub conn: Connection,
}

pub fn open_store(path: impl AsRef<Path>) -> Result<ShadowDb, CoreError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(&path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA journal_size_limit = 67108864; \
         PRAGMA temp_store = MEMORY;",
    )?;
    prepare_connection(&conn)?;
    Ok(ShadowDb { path, conn })
}

pub fn open_store_in_memory() -> Result<ShadowDb, CoreError> {
    let conn = Connection::open_in_memory()?;
    prepare_connection(&conn)?;
    Ok(ShadowDb {
        path: PathBuf::from(":memory:"),
        conn,
    })
}

fn prepare_connection(conn: &Connection) -> Result<(), CoreError> {
    register_functions(conn)?;
    apply_migrations(conn)?;
    Ok(())
}

/// Migrations are tracked through `user_version`; re-running on an
/// initialized store is a no-op.
pub fn apply_migrations(conn: &Connection) -> Result<(), CoreError> {
    let current_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let mut version = current_version as usize;
    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let next_version = idx + 1;
        if next_version <= version {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", next_version))?;
        version = next_version;
    }
    Ok(())
}

/// Registers `shadow_contains(haystack, needle)`: Unicode case-insensitive
/// substring test. NULL haystack never matches.
pub fn register_functions(conn: &Connection) -> Result<(), CoreError> {
    conn.create_scalar_function(
        "shadow_contains",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let haystack: Option<String> = ctx.get(0)?;
            let needle: Option<String> = ctx.get(1)?;
            Ok(match (haystack, needle) {
                (Some(h), Some(n)) => contains_ignore_case(&h, &n),
                _ => false,
            })
        },
    )?;
    Ok(())
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
