use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags};
use tracing::debug;

use crate::error::CoreError;
use crate::models::{Attachment, Handle, MessageAttachmentLink, SourceContact, SourceMessage};

const ADDRESS_BOOK_FILE: &str = "AddressBook-v22.abcddb";

/// Source tables that carry an integer primary key and a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTable {
    Handles,
    Messages,
    Attachments,
    Links,
}

impl SourceTable {
    pub const ALL: [SourceTable; 4] = [
        SourceTable::Handles,
        SourceTable::Messages,
        SourceTable::Attachments,
        SourceTable::Links,
    ];

    /// Source table name; also the watermark key.
    pub fn name(self) -> &'static str {
        match self {
            SourceTable::Handles => "handle",
            SourceTable::Messages => "message",
            SourceTable::Attachments => "attachment",
            SourceTable::Links => "message_attachment_join",
        }
    }
}

/// Range reads are `after < id <= up_to`.
pub trait SourceReader {
    fn max_id(&self, table: SourceTable) -> Result<i64, CoreError>;
    fn handles_between(&self, after: i64, up_to: i64) -> Result<Vec<Handle>, CoreError>;
    fn messages_between(&self, after: i64, up_to: i64) -> Result<Vec<SourceMessage>, CoreError>;
    fn attachments_between(&self, after: i64, up_to: i64) -> Result<Vec<Attachment>, CoreError>;
    fn links_between(&self, after: i64, up_to: i64) -> Result<Vec<MessageAttachmentLink>, CoreError>;
    /// Every message id currently present in the source.
    fn message_ids(&self) -> Result<Vec<i64>, CoreError>;
    fn contact_sources(&self) -> Vec<Box<dyn ContactSource>> {
        Vec::new()
    }
}

pub trait ContactSource {
    fn label(&self) -> String;
    fn read_contacts(&self) -> Result<Vec<SourceContact>, CoreError>;
}

fn open_read_only(path: &Path, busy_timeout: Duration) -> Result<Connection, CoreError> {
    let unavailable = |reason: String| CoreError::SourceUnavailable {
        path: path.display().to_string(),
        reason,
    };
    if !path.exists() {
        return Err(unavailable("file not found".to_string()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| unavailable(e.to_string()))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| unavailable(e.to_string()))?;
    conn.execute_batch("PRAGMA query_only = ON;")
        .map_err(|e| unavailable(e.to_string()))?;
    // permission problems only surface on the first read
    conn.query_row("SELECT COUNT(1) FROM sqlite_master;", [], |row| row.get::<_, i64>(0))
        .map_err(|e| unavailable(e.to_string()))?;
    Ok(conn)
}

pub struct ChatDbSource {
    pub path: PathBuf,
    conn: Connection,
    contacts_root: Option<PathBuf>,
}

impl ChatDbSource {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = open_read_only(&path, busy_timeout)?;
        debug!(path = %path.display(), "opened source store");
        Ok(Self {
            path,
            conn,
            contacts_root: None,
        })
    }

    pub fn with_contacts_root(mut self, root: impl AsRef<Path>) -> Self {
        self.contacts_root = Some(root.as_ref().to_path_buf());
        self
    }
}

impl SourceReader for ChatDbSource {
    fn max_id(&self, table: SourceTable) -> Result<i64, CoreError> {
        let sql = format!("SELECT COALESCE(MAX(ROWID), 0) FROM {};", table.name());
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    fn handles_between(&self, after: i64, up_to: i64) -> Result<Vec<Handle>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT ROWID, id, service FROM handle \
             WHERE ROWID > ?1 AND ROWID <= ?2 \
             ORDER BY ROWID ASC;",
        )?;
        let rows = stmt.query_map(params![after, up_to], |row| {
            Ok(Handle {
                id: row.get(0)?,
                identifier: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                service: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn messages_between(&self, after: i64, up_to: i64) -> Result<Vec<SourceMessage>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT ROWID, guid, text, attributedBody, handle_id, date, is_from_me, cache_has_attachments \
             FROM message \
             WHERE ROWID > ?1 AND ROWID <= ?2 \
             ORDER BY ROWID ASC;",
        )?;
        let rows = stmt.query_map(params![after, up_to], |row| {
            let handle_id: Option<i64> = row.get(4)?;
            Ok(SourceMessage {
                id: row.get(0)?,
                guid: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                raw_text: row.get(2)?,
                raw_blob: row.get(3)?,
                handle_id: handle_id.filter(|id| *id > 0),
                timestamp: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                is_from_me: row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
                has_attachments: row.get::<_, Option<i64>>(7)?.unwrap_or(0) != 0,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn attachments_between(&self, after: i64, up_to: i64) -> Result<Vec<Attachment>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT ROWID, guid, filename, mime_type, total_bytes FROM attachment \
             WHERE ROWID > ?1 AND ROWID <= ?2 \
             ORDER BY ROWID ASC;",
        )?;
        let rows = stmt.query_map(params![after, up_to], |row| {
            Ok(Attachment {
                id: row.get(0)?,
                guid: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                filename: row.get(2)?,
                mime_type: row.get(3)?,
                size: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn links_between(&self, after: i64, up_to: i64) -> Result<Vec<MessageAttachmentLink>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT ROWID, message_id, attachment_id FROM message_attachment_join \
             WHERE ROWID > ?1 AND ROWID <= ?2 \
             ORDER BY ROWID ASC;",
        )?;
        let rows = stmt.query_map(params![after, up_to], |row| {
            Ok(MessageAttachmentLink {
                id: row.get(0)?,
                message_id: row.get(1)?,
                attachment_id: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn message_ids(&self) -> Result<Vec<i64>, CoreError> {
        let mut stmt = self.conn.prepare("SELECT ROWID FROM message ORDER BY ROWID ASC;")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn contact_sources(&self) -> Vec<Box<dyn ContactSource>> {
        match &self.contacts_root {
            Some(root) => discover_address_books(root)
                .into_iter()
                .map(|book| Box::new(book) as Box<dyn ContactSource>)
                .collect(),
            None => Vec::new(),
        }
    }
}

pub struct AddressBookSource {
    pub path: PathBuf,
}

impl ContactSource for AddressBookSource {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn read_contacts(&self) -> Result<Vec<SourceContact>, CoreError> {
        let conn = open_read_only(&self.path, Duration::from_secs(2))?;
        let mut stmt = conn.prepare(
            "SELECT r.ZFIRSTNAME, r.ZLASTNAME, r.ZORGANIZATION, p.ZFULLNUMBER \
             FROM ZABCDPHONENUMBER p \
             JOIN ZABCDRECORD r ON r.Z_PK = p.ZOWNER \
             WHERE p.ZFULLNUMBER IS NOT NULL;",
        )?;
        let rows = stmt.query_map([], |row| {
            let first: Option<String> = row.get(0)?;
            let last: Option<String> = row.get(1)?;
            let organization: Option<String> = row.get(2)?;
            let phone: String = row.get(3)?;
            let name = [first, last]
                .into_iter()
                .flatten()
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            Ok(SourceContact {
                name: if name.is_empty() { None } else { Some(name) },
                organization: organization.filter(|o| !o.trim().is_empty()),
                phone,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Finds the root address book and every per-account book under `Sources/`.
pub fn discover_address_books(root: &Path) -> Vec<AddressBookSource> {
    let mut books = Vec::new();
    let root_book = root.join(ADDRESS_BOOK_FILE);
    if root_book.exists() {
        books.push(AddressBookSource { path: root_book });
    }
    if let Ok(entries) = std::fs::read_dir(root.join("Sources")) {
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path().join(ADDRESS_BOOK_FILE))
            .filter(|path| path.exists())
            .collect();
        paths.sort();
        books.extend(paths.into_iter().map(|path| AddressBookSource { path }));
    }
    books
}
