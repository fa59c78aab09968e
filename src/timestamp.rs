use chrono::{DateTime, SecondsFormat, Utc};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const SOURCE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Below this magnitude a stored date is a legacy seconds value.
const LEGACY_SECONDS_LIMIT: i64 = 100_000_000_000;

/// Scales legacy second-resolution dates to nanoseconds; nanosecond values
/// pass through unchanged.
pub fn normalize_source_timestamp(raw: i64) -> i64 {
    if raw != 0 && raw.unsigned_abs() < LEGACY_SECONDS_LIMIT as u64 {
        raw.saturating_mul(NANOS_PER_SEC)
    } else {
        raw
    }
}

pub fn to_datetime(source_nanos: i64) -> Option<DateTime<Utc>> {
    let secs = source_nanos.div_euclid(NANOS_PER_SEC) + SOURCE_EPOCH_OFFSET_SECS;
    let nanos = source_nanos.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

pub fn from_datetime(dt: DateTime<Utc>) -> i64 {
    (dt.timestamp() - SOURCE_EPOCH_OFFSET_SECS)
        .saturating_mul(NANOS_PER_SEC)
        .saturating_add(i64::from(dt.timestamp_subsec_nanos()))
}

pub fn to_iso(source_nanos: i64) -> Option<String> {
    to_datetime(source_nanos).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}
