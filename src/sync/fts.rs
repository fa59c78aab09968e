use std::time::Instant;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::CoreError;

const INDEXES: [&str; 2] = ["message_fts", "message_fts_syllable"];

/// Adds `after_id < id <= up_to` to both external-content indexes. Only
/// rows new to `messages` may be passed; a row indexed twice corrupts its
/// index until the next full rebuild.
pub(super) fn index_new_messages<F>(
    conn: &Connection,
    after_id: i64,
    up_to: i64,
    progress: &F,
) -> Result<(), CoreError>
where
    F: Fn(&str),
{
    progress("Building search index...");
    let start = Instant::now();
    let indexed = conn.execute(
        "INSERT INTO message_fts(rowid, extracted_text) \
         SELECT id, extracted_text FROM messages WHERE id > ?1 AND id <= ?2;",
        params![after_id, up_to],
    )?;
    conn.execute(
        "INSERT INTO message_fts_syllable(rowid, tokenized_text) \
         SELECT id, tokenized_text FROM messages WHERE id > ?1 AND id <= ?2;",
        params![after_id, up_to],
    )?;
    let build_secs = start.elapsed().as_secs_f32();
    progress(&format!("Search index updated in {:.1}s", build_secs));
    debug!(indexed, after_id, up_to, build_secs, "search indexes updated");
    Ok(())
}

/// Rebuilds both indexes from `messages` and merges their segments.
pub(super) fn rebuild_all(conn: &Connection) -> Result<(), CoreError> {
    let start = Instant::now();
    for index in INDEXES {
        conn.execute(&format!("INSERT INTO {index}({index}) VALUES('rebuild');"), [])?;
        conn.execute(&format!("INSERT INTO {index}({index}) VALUES('optimize');"), [])?;
    }
    debug!(secs = start.elapsed().as_secs_f32(), "search indexes rebuilt");
    Ok(())
}
