use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

use crate::decoder;
use crate::error::CoreError;
use crate::identity::{normalize_identity, DEFAULT_COUNTRY_CODE};
use crate::search::tokenize_syllables;
use crate::source::{SourceReader, SourceTable};
use crate::timestamp::normalize_source_timestamp;

#[path = "sync/contacts.rs"]
mod contacts;
#[path = "sync/fts.rs"]
mod fts;

pub use contacts::ContactSyncReport;

const LAST_SYNC_KEY: &str = "last_sync_at";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub cleanup: bool,
    pub country_code: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            cleanup: false,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    NotRequested,
    Completed { soft_deleted: usize },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub handles: usize,
    pub messages: usize,
    pub attachments: usize,
    pub links: usize,
    pub contacts: ContactSyncReport,
    pub cleanup: CleanupOutcome,
}

struct TableTransfer {
    table: SourceTable,
    transferred: usize,
    observed_max: i64,
    cursor: i64,
}

pub fn sync(
    conn: &mut Connection,
    source: &dyn SourceReader,
    options: &SyncOptions,
) -> Result<SyncReport, CoreError> {
    sync_with_progress(conn, source, options, |_| {})
}

pub fn sync_with_progress<F>(
    conn: &mut Connection,
    source: &dyn SourceReader,
    options: &SyncOptions,
    progress: F,
) -> Result<SyncReport, CoreError>
where
    F: Fn(&str),
{
    let now = Utc::now().timestamp_millis();
    let tx = conn.transaction()?;

    progress("Syncing handles...");
    let handles = transfer_table(&tx, source, SourceTable::Handles, |tx, after, up_to| {
        let rows = source.handles_between(after, up_to)?;
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO handles (id, identifier, service, normalized_identity) \
             VALUES (?1, ?2, ?3, ?4);",
        )?;
        for handle in &rows {
            let normalized = normalize_identity(&handle.identifier, &options.country_code);
            stmt.execute(params![handle.id, handle.identifier, handle.service, normalized])?;
        }
        Ok(rows.len())
    })?;

    progress("Syncing messages...");
    let messages = transfer_table(&tx, source, SourceTable::Messages, |tx, after, up_to| {
        let rows = source.messages_between(after, up_to)?;
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO messages \
             (id, guid, handle_id, timestamp, is_from_me, raw_text, extracted_text, tokenized_text, has_attachments, deleted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL);",
        )?;
        let mut undecoded = 0usize;
        for message in &rows {
            let extracted = decoder::decode(message.raw_text.as_deref(), message.raw_blob.as_deref());
            if extracted.is_none() {
                undecoded += 1;
            }
            let tokenized = extracted.as_deref().map(tokenize_syllables);
            stmt.execute(params![
                message.id,
                message.guid,
                message.handle_id,
                normalize_source_timestamp(message.timestamp),
                message.is_from_me as i64,
                message.raw_text,
                extracted,
                tokenized,
                message.has_attachments as i64,
            ])?;
        }
        if undecoded > 0 {
            debug!(undecoded, "messages without recoverable text");
        }
        Ok(rows.len())
    })?;

    progress("Syncing attachments...");
    let attachments = transfer_table(&tx, source, SourceTable::Attachments, |tx, after, up_to| {
        let rows = source.attachments_between(after, up_to)?;
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO attachments (id, guid, filename, mime_type, size) \
             VALUES (?1, ?2, ?3, ?4, ?5);",
        )?;
        for attachment in &rows {
            stmt.execute(params![
                attachment.id,
                attachment.guid,
                attachment.filename,
                attachment.mime_type,
                attachment.size
            ])?;
        }
        Ok(rows.len())
    })?;

    let links = transfer_table(&tx, source, SourceTable::Links, |tx, after, up_to| {
        let rows = source.links_between(after, up_to)?;
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO message_attachments (id, message_id, attachment_id) \
             VALUES (?1, ?2, ?3);",
        )?;
        for link in &rows {
            stmt.execute(params![link.id, link.message_id, link.attachment_id])?;
        }
        Ok(rows.len())
    })?;

    if messages.transferred > 0 {
        fts::index_new_messages(&tx, messages.cursor, messages.observed_max, &progress)?;
    }

    for transfer in [&handles, &messages, &attachments, &links] {
        advance_sync_watermark(&tx, transfer, now)?;
    }

    progress("Finalizing sync...");
    tx.commit()?;
    info!(
        handles = handles.transferred,
        messages = messages.transferred,
        attachments = attachments.transferred,
        links = links.transferred,
        "sync transaction committed"
    );

    progress("Syncing contacts...");
    let contact_sources = source.contact_sources();
    let contacts = contacts::sync_contacts(conn, &contact_sources, &options.country_code);

    let cleanup = if options.cleanup {
        progress("Checking for deleted messages...");
        match cleanup_orphans(conn, source, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "cleanup skipped");
                CleanupOutcome::Skipped {
                    reason: err.to_string(),
                }
            }
        }
    } else {
        CleanupOutcome::NotRequested
    };

    record_last_sync(conn, now)?;

    Ok(SyncReport {
        handles: handles.transferred,
        messages: messages.transferred,
        attachments: attachments.transferred,
        links: links.transferred,
        contacts,
        cleanup,
    })
}

/// Pulls `cursor < id <= observed_max`, where `observed_max` is read from
/// the source before the pull. Rows that land in the source mid-pull are
/// left for the next run.
fn transfer_table<W>(
    tx: &Transaction<'_>,
    source: &dyn SourceReader,
    table: SourceTable,
    write: W,
) -> Result<TableTransfer, CoreError>
where
    W: FnOnce(&Transaction<'_>, i64, i64) -> Result<usize, CoreError>,
{
    let cursor = read_sync_cursor(tx, table.name())?;
    let observed_max = source.max_id(table)?;
    let transferred = if observed_max > cursor {
        write(tx, cursor, observed_max)?
    } else {
        0
    };
    debug!(table = table.name(), cursor, observed_max, transferred, "table transferred");
    Ok(TableTransfer {
        table,
        transferred,
        observed_max,
        cursor,
    })
}

pub fn read_sync_cursor(conn: &Connection, table_name: &str) -> Result<i64, CoreError> {
    let cursor: Option<i64> = conn
        .query_row(
            "SELECT last_cursor FROM sync_watermarks WHERE table_name = ?1;",
            params![table_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(cursor.unwrap_or(0))
}

fn advance_sync_watermark(tx: &Transaction<'_>, transfer: &TableTransfer, now: i64) -> Result<(), CoreError> {
    let next = transfer.observed_max.max(transfer.cursor);
    tx.execute(
        "INSERT INTO sync_watermarks (table_name, last_cursor, last_sync_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(table_name) DO UPDATE SET \
           last_cursor = MAX(last_cursor, excluded.last_cursor), \
           last_sync_at = excluded.last_sync_at;",
        params![transfer.table.name(), next, now],
    )?;
    Ok(())
}

/// Soft-deletes shadow messages whose ids no longer exist in the source.
fn cleanup_orphans(
    conn: &mut Connection,
    source: &dyn SourceReader,
    now: i64,
) -> Result<CleanupOutcome, CoreError> {
    let source_ids: HashSet<i64> = source.message_ids()?.into_iter().collect();
    if source_ids.is_empty() {
        return Ok(CleanupOutcome::Skipped {
            reason: "source returned no message ids".to_string(),
        });
    }
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS source_message_ids (id INTEGER PRIMARY KEY); \
         DELETE FROM temp.source_message_ids;",
    )?;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO temp.source_message_ids (id) VALUES (?1);")?;
        for id in &source_ids {
            stmt.execute(params![id])?;
        }
    }
    let soft_deleted = tx.execute(
        "UPDATE messages SET deleted_at = ?1 \
         WHERE deleted_at IS NULL \
           AND id NOT IN (SELECT id FROM temp.source_message_ids);",
        params![now],
    )?;
    tx.execute("DELETE FROM temp.source_message_ids;", [])?;
    tx.commit()?;
    if soft_deleted > 0 {
        info!(soft_deleted, "soft-deleted messages missing from source");
    }
    Ok(CleanupOutcome::Completed { soft_deleted })
}

fn record_last_sync(conn: &Connection, now: i64) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![LAST_SYNC_KEY, now.to_string()],
    )?;
    Ok(())
}

pub fn last_successful_sync(conn: &Connection) -> Result<Option<DateTime<Utc>>, CoreError> {
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1;",
            params![LAST_SYNC_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value
        .flatten()
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis))
}

/// True when no sync has succeeded yet or the last one is older than
/// `max_age`. Callers use this to decide whether to sync before reading.
pub fn is_stale(conn: &Connection, max_age: Duration, now: DateTime<Utc>) -> Result<bool, CoreError> {
    let Some(last) = last_successful_sync(conn)? else {
        return Ok(true);
    };
    let age = now.signed_duration_since(last);
    Ok(age.num_milliseconds() < 0 || age.num_milliseconds() as u128 >= max_age.as_millis())
}

/// Full rebuild of both search indexes outside of a sync.
pub fn rebuild_search_indexes(conn: &Connection) -> Result<(), CoreError> {
    fts::rebuild_all(conn)
}
