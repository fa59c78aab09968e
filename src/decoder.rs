//! Best-effort text recovery from streamtyped attributed-string blobs.
//!
//! The source store keeps styled message bodies in an undocumented binary
//! object graph. Nothing here is a full deserializer: we look for the
//! `NSString` payload, read its length prefix, and fall back to scanning
//! for known trailing metadata when the prefix does not make sense.
//! "No text recovered" is an ordinary outcome and is reported as `None`.

use std::sync::OnceLock;

use regex::Regex;

/// Object replacement and replacement character; both mark "no real text".
const SENTINELS: [char; 2] = ['\u{FFFC}', '\u{FFFD}'];

const MIN_BLOB_LEN: usize = 24;

const STRING_MARKER: &[u8] = b"NSString";
const LENGTH_MARKER: u8 = b'+';
const LENGTH_ESCAPE: u8 = 0x81;
const SINGLE_BYTE_LIMIT: u8 = 0x80;

/// Metadata that follows the text span in the general layout.
const TERMINATORS: [&[u8]; 5] = [
    b"NSDictionary",
    b"__kIM",
    b"NSNumber",
    b"NSValue",
    b"bplist00",
];
const CONTROL_RUN_LEN: usize = 3;

const RICH_CARD_MARKER: &[u8] = b"RCSRichCard";
const RICH_CARD_DESCRIPTION: &[u8] = b"description";
/// Fields that follow the description inside a rich card.
const RICH_CARD_TERMINATORS: [&[u8]; 5] = [
    b"title",
    b"mediaUrl",
    b"mediaContentType",
    b"suggestions",
    b"cardOrientation",
];
const MAX_FRAMING_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    RichCard,
    DeclaredLength,
    TerminatorScan,
}

impl DecodeStrategy {
    /// Tried in order; the first strategy that yields text wins.
    pub const ORDER: [DecodeStrategy; 3] = [
        DecodeStrategy::RichCard,
        DecodeStrategy::DeclaredLength,
        DecodeStrategy::TerminatorScan,
    ];

    pub fn apply(self, blob: &[u8]) -> Option<String> {
        match self {
            DecodeStrategy::RichCard => rich_card_text(blob),
            DecodeStrategy::DeclaredLength => {
                let payload = locate_payload(blob)?;
                let len = payload.declared_len.filter(|len| *len > 0)?;
                let end = payload.text_start.checked_add(len)?;
                if end > blob.len() {
                    return None;
                }
                clean_text(&blob[payload.text_start..end])
            }
            DecodeStrategy::TerminatorScan => {
                let payload = locate_payload(blob)?;
                let rest = &blob[payload.text_start..];
                let end = first_terminator(rest, &TERMINATORS, true).unwrap_or(rest.len());
                if end == 0 {
                    return None;
                }
                clean_text(&rest[..end])
            }
        }
    }
}

/// Returns the message text, preferring the plain column and only falling
/// back to the blob when the plain column is absent or a placeholder.
pub fn decode(raw_text: Option<&str>, raw_blob: Option<&[u8]>) -> Option<String> {
    if let Some(text) = raw_text.map(str::trim) {
        if !text.is_empty() && !is_sentinel_only(text) {
            return Some(text.to_string());
        }
    }
    decode_blob(raw_blob?).map(|(_, text)| text)
}

pub fn decode_blob(blob: &[u8]) -> Option<(DecodeStrategy, String)> {
    if blob.len() < MIN_BLOB_LEN {
        return None;
    }
    DecodeStrategy::ORDER
        .iter()
        .find_map(|strategy| strategy.apply(blob).map(|text| (*strategy, text)))
}

pub fn is_sentinel_only(text: &str) -> bool {
    text.chars().all(|c| SENTINELS.contains(&c) || c.is_whitespace())
}

struct Payload {
    text_start: usize,
    declared_len: Option<usize>,
}

fn locate_payload(blob: &[u8]) -> Option<Payload> {
    let marker = find(blob, STRING_MARKER, 0)?;
    let after_marker = marker + STRING_MARKER.len();
    let plus = blob[after_marker..]
        .iter()
        .position(|b| *b == LENGTH_MARKER)?
        + after_marker;
    read_length(blob, plus + 1)
}

/// Parses a length field at `pos`: one byte below 0x80, or an escape byte
/// followed by a little-endian u16. Any other escape leaves the length
/// unknown but still marks where the text starts.
fn read_length(blob: &[u8], pos: usize) -> Option<Payload> {
    let first = *blob.get(pos)?;
    if first < SINGLE_BYTE_LIMIT {
        return Some(Payload {
            text_start: pos + 1,
            declared_len: Some(first as usize),
        });
    }
    if first == LENGTH_ESCAPE {
        let lo = *blob.get(pos + 1)?;
        let hi = *blob.get(pos + 2)?;
        return Some(Payload {
            text_start: pos + 3,
            declared_len: Some(u16::from_le_bytes([lo, hi]) as usize),
        });
    }
    if pos + 1 > blob.len() {
        return None;
    }
    Some(Payload {
        text_start: pos + 1,
        declared_len: None,
    })
}

fn rich_card_text(blob: &[u8]) -> Option<String> {
    let card = find(blob, RICH_CARD_MARKER, 0)?;
    let field = find(blob, RICH_CARD_DESCRIPTION, card + RICH_CARD_MARKER.len())?;
    let start = skip_framing(blob, field + RICH_CARD_DESCRIPTION.len())?;
    let rest = &blob[start..];
    let end = first_terminator(rest, &RICH_CARD_TERMINATORS, false).unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    clean_text(&rest[..end])
}

/// Skips the short run of non-printable bytes between a field name and its
/// value, including an inline length prefix when one is present.
fn skip_framing(blob: &[u8], mut pos: usize) -> Option<usize> {
    let limit = (pos + MAX_FRAMING_BYTES).min(blob.len());
    while pos < limit {
        let b = blob[pos];
        if b == LENGTH_MARKER {
            return read_length(blob, pos + 1).map(|payload| payload.text_start);
        }
        if b < 0x20 || (0x7f..=0x9f).contains(&b) {
            pos += 1;
            continue;
        }
        break;
    }
    if pos >= blob.len() {
        None
    } else {
        Some(pos)
    }
}

fn first_terminator(bytes: &[u8], terminators: &[&[u8]], control_runs: bool) -> Option<usize> {
    let mut earliest = terminators
        .iter()
        .filter_map(|needle| find(bytes, needle, 0))
        .min();
    if control_runs {
        if let Some(run) = find_control_run(bytes, CONTROL_RUN_LEN) {
            earliest = Some(earliest.map_or(run, |e| e.min(run)));
        }
    }
    earliest
}

fn find_control_run(bytes: &[u8], run_len: usize) -> Option<usize> {
    let mut run = 0;
    for (idx, b) in bytes.iter().enumerate() {
        if *b < 0x20 && *b != b'\n' && *b != b'\t' {
            run += 1;
            if run >= run_len {
                return Some(idx + 1 - run_len);
            }
        } else {
            run = 0;
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|idx| idx + from)
}

fn residue_pattern() -> &'static Regex {
    static RESIDUE: OnceLock<Regex> = OnceLock::new();
    RESIDUE.get_or_init(|| {
        Regex::new(r"(?:\x{FFFD}+[!-~]{0,8})+\s*$").expect("residue pattern compiles")
    })
}

fn clean_text(bytes: &[u8]) -> Option<String> {
    let decoded = String::from_utf8_lossy(bytes);
    let printable: String = decoded
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let without_residue = residue_pattern().replace(&printable, "");
    let cleaned: String = without_residue
        .chars()
        .filter(|c| !SENTINELS.contains(c))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || is_sentinel_only(trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}
