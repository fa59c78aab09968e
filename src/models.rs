use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub id: i64,
    pub identifier: String,
    pub service: Option<String>,
}

/// A message row as read from the source store, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub id: i64,
    pub guid: String,
    pub handle_id: Option<i64>,
    pub timestamp: i64,
    pub is_from_me: bool,
    pub raw_text: Option<String>,
    pub raw_blob: Option<Vec<u8>>,
    pub has_attachments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub guid: String,
    pub handle_id: Option<i64>,
    pub timestamp: i64,
    pub is_from_me: bool,
    pub raw_text: Option<String>,
    pub extracted_text: Option<String>,
    pub tokenized_text: Option<String>,
    pub has_attachments: bool,
    pub deleted_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub guid: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachmentLink {
    pub id: i64,
    pub message_id: i64,
    pub attachment_id: i64,
}

/// One entry read from an external contact source, not yet normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContact {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone_normalized: String,
    pub name: Option<String>,
    pub organization: Option<String>,
    pub phone_raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderAlias {
    pub phone_normalized: String,
    pub alias: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub table_name: String,
    pub last_cursor: i64,
    pub last_sync_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushWatermark {
    pub endpoint: String,
    pub last_cursor: i64,
    pub last_push_at: Option<i64>,
    pub total_pushed: i64,
}

/// A message joined with its sender identity and resolved display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub message: MessageRow,
    pub sender: Option<String>,
    pub sender_name: Option<String>,
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub rows: Vec<MessageView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub handles: i64,
    pub messages: i64,
    pub deleted_messages: i64,
    pub attachments: i64,
    pub contacts: i64,
    pub aliases: i64,
}
