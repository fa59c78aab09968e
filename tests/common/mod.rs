#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use shadowmsg_core::error::CoreError;
use shadowmsg_core::models::{Attachment, Handle, MessageAttachmentLink, SourceContact, SourceMessage};
use shadowmsg_core::source::{ContactSource, SourceReader, SourceTable};
use shadowmsg_core::timestamp;

const HEADER: &[u8] = b"\x04\x0bstreamtyped\x81\xe8\x03\x84\x01@\x84\x84\x84\x12NSAttributedString\x00\x84\x84\x08NSObject\x00\x85\x92\x84\x84\x84\x08NSString\x01\x94\x84\x01+";
const TRAILER: &[u8] = b"\x86\x84\x02iI\x01\x00\x86\x84\x84\x84\x0cNSDictionary\x00\x94\x84\x01i\x01\x92\x86";

/// Minimal attributed-body blob carrying `text`.
pub fn streamtyped(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut blob = HEADER.to_vec();
    if bytes.len() < 0x80 {
        blob.push(bytes.len() as u8);
    } else {
        blob.push(0x81);
        blob.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    }
    blob.extend_from_slice(bytes);
    blob.extend_from_slice(TRAILER);
    blob
}

/// Source timestamp (nanoseconds since 2001) for a UTC calendar day.
pub fn day(year: i32, month: u32, date: u32) -> i64 {
    timestamp::from_datetime(Utc.with_ymd_and_hms(year, month, date, 12, 0, 0).unwrap())
}

pub fn handle(id: i64, identifier: &str) -> Handle {
    Handle {
        id,
        identifier: identifier.to_string(),
        service: Some("iMessage".to_string()),
    }
}

pub fn text_message(id: i64, handle_id: i64, text: &str, ts: i64) -> SourceMessage {
    SourceMessage {
        id,
        guid: format!("guid-{}", id),
        handle_id: Some(handle_id),
        timestamp: ts,
        is_from_me: false,
        raw_text: Some(text.to_string()),
        raw_blob: None,
        has_attachments: false,
    }
}

pub fn blob_message(id: i64, handle_id: i64, text: &str, ts: i64) -> SourceMessage {
    SourceMessage {
        raw_text: None,
        raw_blob: Some(streamtyped(text)),
        ..text_message(id, handle_id, text, ts)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBook {
    pub label: String,
    pub entries: Vec<SourceContact>,
    pub fail: bool,
}

impl MemoryBook {
    pub fn new(label: &str, entries: &[(&str, &str)]) -> Self {
        Self {
            label: label.to_string(),
            entries: entries
                .iter()
                .map(|(name, phone)| SourceContact {
                    name: Some(name.to_string()),
                    organization: None,
                    phone: phone.to_string(),
                })
                .collect(),
            fail: false,
        }
    }

    pub fn broken(label: &str) -> Self {
        Self {
            label: label.to_string(),
            entries: Vec::new(),
            fail: true,
        }
    }
}

impl ContactSource for MemoryBook {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn read_contacts(&self) -> Result<Vec<SourceContact>, CoreError> {
        if self.fail {
            return Err(CoreError::SourceUnavailable {
                path: self.label.clone(),
                reason: "permission denied".to_string(),
            });
        }
        Ok(self.entries.clone())
    }
}

/// In-memory stand-in for the source store.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub handles: Vec<Handle>,
    pub messages: Vec<SourceMessage>,
    pub attachments: Vec<Attachment>,
    pub links: Vec<MessageAttachmentLink>,
    pub books: Vec<MemoryBook>,
    /// Reported max id per table name, for rows the reader never returns.
    pub max_overrides: HashMap<&'static str, i64>,
    pub fail_messages: bool,
    pub fail_message_ids: bool,
}

fn between<T: Clone>(rows: &[T], id: impl Fn(&T) -> i64, after: i64, up_to: i64) -> Vec<T> {
    let mut out: Vec<T> = rows
        .iter()
        .filter(|row| id(row) > after && id(row) <= up_to)
        .cloned()
        .collect();
    out.sort_by_key(|row| id(row));
    out
}

impl SourceReader for MemorySource {
    fn max_id(&self, table: SourceTable) -> Result<i64, CoreError> {
        let observed = match table {
            SourceTable::Handles => self.handles.iter().map(|h| h.id).max(),
            SourceTable::Messages => self.messages.iter().map(|m| m.id).max(),
            SourceTable::Attachments => self.attachments.iter().map(|a| a.id).max(),
            SourceTable::Links => self.links.iter().map(|l| l.id).max(),
        }
        .unwrap_or(0);
        let reported = self.max_overrides.get(table.name()).copied().unwrap_or(0);
        Ok(observed.max(reported))
    }

    fn handles_between(&self, after: i64, up_to: i64) -> Result<Vec<Handle>, CoreError> {
        Ok(between(&self.handles, |h| h.id, after, up_to))
    }

    fn messages_between(&self, after: i64, up_to: i64) -> Result<Vec<SourceMessage>, CoreError> {
        if self.fail_messages {
            return Err(CoreError::SourceUnavailable {
                path: "memory".to_string(),
                reason: "database is locked".to_string(),
            });
        }
        Ok(between(&self.messages, |m| m.id, after, up_to))
    }

    fn attachments_between(&self, after: i64, up_to: i64) -> Result<Vec<Attachment>, CoreError> {
        Ok(between(&self.attachments, |a| a.id, after, up_to))
    }

    fn links_between(&self, after: i64, up_to: i64) -> Result<Vec<MessageAttachmentLink>, CoreError> {
        Ok(between(&self.links, |l| l.id, after, up_to))
    }

    fn message_ids(&self) -> Result<Vec<i64>, CoreError> {
        if self.fail_message_ids {
            return Err(CoreError::SourceUnavailable {
                path: "memory".to_string(),
                reason: "disk I/O error".to_string(),
            });
        }
        Ok(self.messages.iter().map(|m| m.id).collect())
    }

    fn contact_sources(&self) -> Vec<Box<dyn ContactSource>> {
        self.books
            .iter()
            .cloned()
            .map(|book| Box::new(book) as Box<dyn ContactSource>)
            .collect()
    }
}

/// Two handles, five messages, one attachment on message 3.
pub fn sample_source() -> MemorySource {
    MemorySource {
        handles: vec![handle(1, "+821012345678"), handle(2, "Friend@Example.com")],
        messages: vec![
            text_message(1, 1, "Amazon payment received", day(2024, 1, 10)),
            blob_message(2, 1, "Amazon order shipped", day(2024, 2, 10)),
            text_message(3, 2, "photo from the trip", day(2024, 3, 10)),
            blob_message(4, 2, "안녕하세요 반가워요", day(2024, 4, 10)),
            text_message(5, 1, "see you at the amazon locker", day(2024, 5, 10)),
        ],
        attachments: vec![Attachment {
            id: 1,
            guid: "att-1".to_string(),
            filename: Some("~/Library/Messages/Attachments/trip.jpg".to_string()),
            mime_type: Some("image/jpeg".to_string()),
            size: Some(2048),
        }],
        links: vec![MessageAttachmentLink {
            id: 1,
            message_id: 3,
            attachment_id: 1,
        }],
        ..MemorySource::default()
    }
}
