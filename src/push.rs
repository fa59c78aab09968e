use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::models::{MessageView, PushWatermark};
use crate::query::{map_view, view_select_sql};
use crate::timestamp;

pub const DEFAULT_SERVICE: &str = "iMessage";
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub external_id: String,
    pub sender: Option<String>,
    pub sender_name: Option<String>,
    pub body: Option<String>,
    pub sent_at: Option<String>,
    pub service: String,
    pub is_from_me: bool,
}

impl From<MessageView> for PushMessage {
    fn from(view: MessageView) -> Self {
        Self {
            external_id: view.message.guid,
            sender: view.sender,
            sender_name: view.sender_name,
            body: view.message.extracted_text,
            sent_at: timestamp::to_iso(view.message.timestamp),
            service: view
                .service
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            is_from_me: view.message.is_from_me,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub messages: Vec<PushMessage>,
}

/// Counts reported back by the remote. Either may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushAck {
    pub imported: Option<i64>,
    pub skipped: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivers one batch. Implementations return non-success responses as
/// `Ok`; only failures to get any response at all are `Err`.
pub trait Transport {
    fn submit(&self, endpoint: &EndpointConfig, payload: &PushPayload) -> Result<TransportResponse, CoreError>;
}

pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn submit(&self, endpoint: &EndpointConfig, payload: &PushPayload) -> Result<TransportResponse, CoreError> {
        let request = self
            .agent
            .post(&endpoint.url)
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .set("Authorization", &format!("Bearer {}", endpoint.token));
        match request.send_json(payload) {
            Ok(response) => {
                let status = response.status();
                let body = response.into_string()?;
                Ok(TransportResponse { status, body })
            }
            Err(ureq::Error::Status(status, response)) => Ok(TransportResponse {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(err)) => Err(CoreError::Http(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    pub batch_size: usize,
    pub dry_run: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Zero-based position within the run.
    pub index: usize,
    pub size: usize,
    pub first_id: i64,
    pub last_id: i64,
    pub imported: i64,
    pub skipped: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub batches: Vec<BatchReport>,
    pub imported: i64,
    pub skipped: i64,
    pub total: i64,
    /// Cursor after the run; unchanged from the start when nothing was sent.
    pub last_id: i64,
    pub dry_run: bool,
}

pub trait PushObserver {
    fn batch_completed(&mut self, batch: &BatchReport);
}

impl<F> PushObserver for F
where
    F: FnMut(&BatchReport),
{
    fn batch_completed(&mut self, batch: &BatchReport) {
        self(batch)
    }
}

/// Sends unsent messages in id order. The watermark moves only after a
/// batch is acknowledged, so a failed run resends from the failed batch.
pub fn push(
    conn: &Connection,
    endpoint: &EndpointConfig,
    transport: &dyn Transport,
    options: PushOptions,
    mut observer: Option<&mut dyn PushObserver>,
) -> Result<PushReport, CoreError> {
    if options.batch_size == 0 {
        return Err(CoreError::InvalidArgument("batch size must be positive".to_string()));
    }
    if endpoint.name.trim().is_empty() {
        return Err(CoreError::InvalidArgument("endpoint name is empty".to_string()));
    }

    let mut cursor = push_status(conn, &endpoint.name)?.last_cursor;
    let mut report = PushReport {
        last_id: cursor,
        dry_run: options.dry_run,
        ..PushReport::default()
    };

    loop {
        let rows = fetch_batch(conn, cursor, options.batch_size)?;
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            break;
        };
        let (first_id, last_id) = (first.message.id, last.message.id);
        let size = rows.len();
        let payload = PushPayload {
            messages: rows.into_iter().map(PushMessage::from).collect(),
        };

        let (imported, skipped) = if options.dry_run {
            (size as i64, 0)
        } else {
            let response = transport.submit(endpoint, &payload)?;
            if !response.is_success() {
                warn!(
                    endpoint = %endpoint.name,
                    status = response.status,
                    batch = report.batches.len(),
                    "batch rejected"
                );
                return Err(CoreError::Transport {
                    status: response.status,
                    body: response.body,
                });
            }
            let ack = parse_ack(&response.body);
            let skipped = ack.skipped.unwrap_or(0);
            let imported = ack.imported.unwrap_or(size as i64 - skipped);
            advance_push_watermark(conn, &endpoint.name, last_id, size as i64)?;
            (imported, skipped)
        };

        cursor = last_id;
        let batch = BatchReport {
            index: report.batches.len(),
            size,
            first_id,
            last_id,
            imported,
            skipped,
        };
        debug!(
            endpoint = %endpoint.name,
            index = batch.index,
            size,
            first_id,
            last_id,
            dry_run = options.dry_run,
            "batch complete"
        );
        if let Some(observer) = observer.as_mut() {
            observer.batch_completed(&batch);
        }
        report.imported += imported;
        report.skipped += skipped;
        report.total += size as i64;
        report.last_id = last_id;
        report.batches.push(batch);
    }

    info!(
        endpoint = %endpoint.name,
        batches = report.batches.len(),
        total = report.total,
        imported = report.imported,
        skipped = report.skipped,
        dry_run = options.dry_run,
        "push finished"
    );
    Ok(report)
}

fn parse_ack(body: &str) -> PushAck {
    if body.trim().is_empty() {
        return PushAck::default();
    }
    match serde_json::from_str(body) {
        Ok(ack) => ack,
        Err(err) => {
            debug!(error = %err, "unparseable push response, assuming all imported");
            PushAck::default()
        }
    }
}

fn fetch_batch(conn: &Connection, after: i64, batch_size: usize) -> Result<Vec<MessageView>, CoreError> {
    let sql = format!(
        "{} WHERE m.deleted_at IS NULL AND m.id > ?1 ORDER BY m.id ASC LIMIT ?2;",
        view_select_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![after, batch_size as i64], map_view)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn advance_push_watermark(conn: &Connection, endpoint: &str, last_id: i64, pushed: i64) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO push_watermarks (endpoint, last_cursor, last_push_at, total_pushed) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(endpoint) DO UPDATE SET \
           last_cursor = MAX(last_cursor, excluded.last_cursor), \
           last_push_at = excluded.last_push_at, \
           total_pushed = total_pushed + excluded.total_pushed;",
        params![endpoint, last_id, Utc::now().timestamp_millis(), pushed],
    )?;
    Ok(())
}

/// Current watermark for `endpoint`; a never-pushed endpoint reports zero.
pub fn push_status(conn: &Connection, endpoint: &str) -> Result<PushWatermark, CoreError> {
    let existing = conn
        .query_row(
            "SELECT endpoint, last_cursor, last_push_at, total_pushed \
             FROM push_watermarks WHERE endpoint = ?1;",
            params![endpoint],
            |row| {
                Ok(PushWatermark {
                    endpoint: row.get(0)?,
                    last_cursor: row.get(1)?,
                    last_push_at: row.get(2)?,
                    total_pushed: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(existing.unwrap_or_else(|| PushWatermark {
        endpoint: endpoint.to_string(),
        last_cursor: 0,
        last_push_at: None,
        total_pushed: 0,
    }))
}

/// Zeroes the cursor and cumulative counter of one endpoint.
pub fn reset(conn: &Connection, endpoint: &str) -> Result<(), CoreError> {
    if endpoint.trim().is_empty() {
        return Err(CoreError::InvalidArgument("endpoint name is empty".to_string()));
    }
    conn.execute(
        "INSERT INTO push_watermarks (endpoint, last_cursor, last_push_at, total_pushed) \
         VALUES (?1, 0, NULL, 0) \
         ON CONFLICT(endpoint) DO UPDATE SET last_cursor = 0, last_push_at = NULL, total_pushed = 0;",
        params![endpoint],
    )?;
    info!(endpoint, "push watermark reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_defaults_when_fields_missing() {
        assert_eq!(parse_ack(""), PushAck::default());
        assert_eq!(parse_ack("not json"), PushAck::default());
        assert_eq!(
            parse_ack(r#"{"imported": 3}"#),
            PushAck {
                imported: Some(3),
                skipped: None
            }
        );
    }

    #[test]
    fn endpoint_timeout_has_default() {
        let endpoint: EndpointConfig =
            serde_json::from_str(r#"{"name":"a","url":"http://x","token":"t"}"#).expect("parse");
        assert_eq!(endpoint.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn response_success_range() {
        let ok = TransportResponse { status: 204, body: String::new() };
        let bad = TransportResponse { status: 500, body: String::new() };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
