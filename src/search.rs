use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::debug;

use crate::error::CoreError;
use crate::models::SearchPage;
use crate::query::{map_view, view_select_sql, DISPLAY_NAME_SQL, VIEW_JOINS_SQL};
use crate::timestamp;

pub const DEFAULT_LIMIT: i64 = 50;

const TRIGRAM_MIN_CHARS: usize = 3;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Substring of the handle identifier, alias, or contact name.
    pub sender: Option<String>,
    /// Inclusive lower bound.
    pub after: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub before: Option<DateTime<Utc>>,
    /// Forward pagination: only rows with a greater id.
    pub since_id: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            sender: None,
            after: None,
            before: None,
            since_id: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Splits a query into terms. Double-quoted spans are single terms, the
/// rest splits on whitespace. Operators such as `OR` are plain terms.
pub fn parse_query(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in query.chars() {
        if ch == '"' {
            if in_quotes {
                if !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
            } else if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            in_quotes = !in_quotes;
            continue;
        }
        if !in_quotes && ch.is_whitespace() {
            if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(ch);
    }
    if in_quotes {
        let tail = current.trim();
        if !tail.is_empty() {
            terms.push(tail.to_string());
        }
    } else if !current.is_empty() {
        terms.push(current);
    }
    terms
}

/// One token per character, whitespace dropped.
pub fn tokenize_syllables(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fts_phrase(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    fn new() -> Self {
        Self {
            clauses: vec!["m.deleted_at IS NULL".to_string()],
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: impl Into<Value>) -> usize {
        self.params.push(value.into());
        self.params.len()
    }

    fn push_term(&mut self, term: &str) {
        if term.chars().count() >= TRIGRAM_MIN_CHARS {
            let idx = self.bind(fts_phrase(term));
            self.clauses.push(format!(
                "m.id IN (SELECT rowid FROM message_fts WHERE message_fts MATCH ?{})",
                idx
            ));
        } else if term.chars().any(char::is_alphanumeric) {
            let idx = self.bind(fts_phrase(&tokenize_syllables(term)));
            self.clauses.push(format!(
                "m.id IN (SELECT rowid FROM message_fts_syllable WHERE message_fts_syllable MATCH ?{})",
                idx
            ));
        }
        let idx = self.bind(term.to_string());
        self.clauses
            .push(format!("shadow_contains(m.extracted_text, ?{})", idx));
    }

    fn where_sql(&self) -> String {
        self.clauses.join(" AND ")
    }
}

fn build_filter(terms: &[String], options: &SearchOptions) -> Filter {
    let mut filter = Filter::new();
    for term in terms {
        filter.push_term(term);
    }
    if let Some(sender) = options.sender.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let idx = filter.bind(sender.to_string());
        filter.clauses.push(format!(
            "(shadow_contains(h.identifier, ?{idx}) \
              OR shadow_contains(a.alias, ?{idx}) \
              OR shadow_contains({display}, ?{idx}))",
            idx = idx,
            display = DISPLAY_NAME_SQL,
        ));
    }
    if let Some(after) = options.after {
        let idx = filter.bind(timestamp::from_datetime(after));
        filter.clauses.push(format!("m.timestamp >= ?{}", idx));
    }
    if let Some(before) = options.before {
        let idx = filter.bind(timestamp::from_datetime(before));
        filter.clauses.push(format!("m.timestamp < ?{}", idx));
    }
    if let Some(since_id) = options.since_id {
        let idx = filter.bind(since_id);
        filter.clauses.push(format!("m.id > ?{}", idx));
    }
    filter
}

/// Runs `query` with AND semantics across terms. Rows come back newest
/// first; `total` counts every match ignoring limit and offset.
pub fn search_messages(
    conn: &Connection,
    query: &str,
    options: &SearchOptions,
) -> Result<SearchPage, CoreError> {
    if options.limit <= 0 {
        return Err(CoreError::InvalidArgument("limit must be positive".to_string()));
    }
    if options.offset < 0 {
        return Err(CoreError::InvalidArgument("offset must not be negative".to_string()));
    }
    let terms = parse_query(query);
    let filter = build_filter(&terms, options);
    let where_sql = filter.where_sql();

    let ascending = options.since_id.is_some();
    let order = if ascending {
        "m.timestamp ASC, m.id ASC"
    } else {
        "m.timestamp DESC, m.id DESC"
    };
    let limit_idx = filter.params.len() + 1;
    let sql = format!(
        "{select} WHERE {where_sql} ORDER BY {order} LIMIT ?{limit} OFFSET ?{offset};",
        select = view_select_sql(),
        where_sql = where_sql,
        order = order,
        limit = limit_idx,
        offset = limit_idx + 1,
    );
    let mut params = filter.params.clone();
    params.push(options.limit.into());
    params.push(options.offset.into());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), map_view)?;
    let mut rows = rows.collect::<Result<Vec<_>, _>>()?;
    if ascending {
        rows.reverse();
    }

    let count_sql = format!("SELECT COUNT(1) {} WHERE {};", VIEW_JOINS_SQL, where_sql);
    let total: i64 = conn.query_row(
        &count_sql,
        rusqlite::params_from_iter(filter.params),
        |row| row.get(0),
    )?;

    debug!(terms = terms.len(), returned = rows.len(), total, "search complete");
    Ok(SearchPage {
        rows,
        total,
        limit: options.limit,
        offset: options.offset,
    })
}
