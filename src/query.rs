use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CoreError;
use crate::identity::normalize_identity;
use crate::models::{
    Attachment, MessageRow, MessageView, PushWatermark, SenderAlias, StoreStats, SyncWatermark,
};

/// Alias, then a non-blank contact name, then the contact's organization,
/// then the raw handle identifier.
pub(crate) const DISPLAY_NAME_SQL: &str = "COALESCE(NULLIF(trim(a.alias), ''), \
     NULLIF(trim(c.name), ''), NULLIF(trim(c.organization), ''), h.identifier)";

pub(crate) const VIEW_JOINS_SQL: &str = "FROM messages m \
     LEFT JOIN handles h ON h.id = m.handle_id \
     LEFT JOIN sender_aliases a ON a.phone_normalized = h.normalized_identity \
     LEFT JOIN contacts c ON c.phone_normalized = h.normalized_identity";

pub(crate) fn view_select_sql() -> String {
    format!(
        "SELECT m.id, m.guid, m.handle_id, m.timestamp, m.is_from_me, m.raw_text, \
                m.extracted_text, m.tokenized_text, m.has_attachments, m.deleted_at, \
                h.identifier, {display}, h.service \
         {joins}",
        display = DISPLAY_NAME_SQL,
        joins = VIEW_JOINS_SQL,
    )
}

pub(crate) fn map_view(row: &Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        message: MessageRow {
            id: row.get(0)?,
            guid: row.get(1)?,
            handle_id: row.get(2)?,
            timestamp: row.get(3)?,
            is_from_me: row.get::<_, i64>(4)? != 0,
            raw_text: row.get(5)?,
            extracted_text: row.get(6)?,
            tokenized_text: row.get(7)?,
            has_attachments: row.get::<_, i64>(8)? != 0,
            deleted_at: row.get(9)?,
        },
        sender: row.get(10)?,
        sender_name: row.get(11)?,
        service: row.get(12)?,
    })
}

pub fn get_message(conn: &Connection, message_id: i64) -> Result<Option<MessageView>, CoreError> {
    let sql = format!("{} WHERE m.id = ?1;", view_select_sql());
    Ok(conn.query_row(&sql, params![message_id], map_view).optional()?)
}

/// Newest first, soft-deleted rows excluded.
pub fn list_recent_messages(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageView>, CoreError> {
    let sql = format!(
        "{} WHERE m.deleted_at IS NULL \
         ORDER BY m.timestamp DESC, m.id DESC \
         LIMIT ?1 OFFSET ?2;",
        view_select_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit, offset], map_view)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_attachments_for_message(
    conn: &Connection,
    message_id: i64,
) -> Result<Vec<Attachment>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.guid, a.filename, a.mime_type, a.size \
         FROM attachments a \
         JOIN message_attachments ma ON ma.attachment_id = a.id \
         WHERE ma.message_id = ?1 \
         ORDER BY a.id ASC;",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        Ok(Attachment {
            id: row.get(0)?,
            guid: row.get(1)?,
            filename: row.get(2)?,
            mime_type: row.get(3)?,
            size: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn resolve_display_name(conn: &Connection, handle_id: i64) -> Result<Option<String>, CoreError> {
    let sql = format!(
        "SELECT {display} FROM handles h \
         LEFT JOIN sender_aliases a ON a.phone_normalized = h.normalized_identity \
         LEFT JOIN contacts c ON c.phone_normalized = h.normalized_identity \
         WHERE h.id = ?1;",
        display = DISPLAY_NAME_SQL
    );
    Ok(conn
        .query_row(&sql, params![handle_id], |row| row.get(0))
        .optional()?
        .flatten())
}

pub fn store_stats(conn: &Connection) -> Result<StoreStats, CoreError> {
    let count = |sql: &str| -> Result<i64, CoreError> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(StoreStats {
        handles: count("SELECT COUNT(1) FROM handles;")?,
        messages: count("SELECT COUNT(1) FROM messages WHERE deleted_at IS NULL;")?,
        deleted_messages: count("SELECT COUNT(1) FROM messages WHERE deleted_at IS NOT NULL;")?,
        attachments: count("SELECT COUNT(1) FROM attachments;")?,
        contacts: count("SELECT COUNT(1) FROM contacts;")?,
        aliases: count("SELECT COUNT(1) FROM sender_aliases;")?,
    })
}

pub fn list_sync_watermarks(conn: &Connection) -> Result<Vec<SyncWatermark>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT table_name, last_cursor, last_sync_at FROM sync_watermarks ORDER BY table_name ASC;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SyncWatermark {
            table_name: row.get(0)?,
            last_cursor: row.get(1)?,
            last_sync_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_push_watermarks(conn: &Connection) -> Result<Vec<PushWatermark>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT endpoint, last_cursor, last_push_at, total_pushed FROM push_watermarks ORDER BY endpoint ASC;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(PushWatermark {
            endpoint: row.get(0)?,
            last_cursor: row.get(1)?,
            last_push_at: row.get(2)?,
            total_pushed: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ===== Sender aliases =====

pub fn set_alias(
    conn: &Connection,
    identity: &str,
    alias: &str,
    country_code: &str,
) -> Result<SenderAlias, CoreError> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Err(CoreError::InvalidArgument("alias is empty".to_string()));
    }
    let phone_normalized = normalize_identity(identity, country_code);
    if phone_normalized.is_empty() {
        return Err(CoreError::InvalidArgument("identity is empty".to_string()));
    }
    let now = Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO sender_aliases (phone_normalized, alias, created_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(phone_normalized) DO UPDATE SET alias = excluded.alias;",
        params![phone_normalized, alias, now],
    )?;
    let created_at: i64 = conn.query_row(
        "SELECT created_at FROM sender_aliases WHERE phone_normalized = ?1;",
        params![phone_normalized],
        |row| row.get(0),
    )?;
    Ok(SenderAlias {
        phone_normalized,
        alias: alias.to_string(),
        created_at,
    })
}

/// Returns whether an alias was removed.
pub fn remove_alias(conn: &Connection, identity: &str, country_code: &str) -> Result<bool, CoreError> {
    let phone_normalized = normalize_identity(identity, country_code);
    let removed = conn.execute(
        "DELETE FROM sender_aliases WHERE phone_normalized = ?1;",
        params![phone_normalized],
    )?;
    Ok(removed > 0)
}

pub fn list_aliases(conn: &Connection) -> Result<Vec<SenderAlias>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT phone_normalized, alias, created_at FROM sender_aliases ORDER BY alias ASC;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SenderAlias {
            phone_normalized: row.get(0)?,
            alias: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
