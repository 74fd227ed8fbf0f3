//! Normalizing pickup and dropoff timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;

use super::chunks::Chunk;
use crate::common::*;

/// Columns holding trip timestamps. We also match any column ending in
/// `_` plus one of these, such as `tpep_pickup_datetime`.
const TIMESTAMP_COLUMNS: &[&str] = &["pickup_datetime", "dropoff_datetime"];

/// Timestamp formats we accept, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// The format we send to PostgreSQL.
const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Should values in the column `name` be normalized as timestamps?
pub(crate) fn is_timestamp_column(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    TIMESTAMP_COLUMNS.iter().any(|&ts_col| {
        name == ts_col
            || name
                .strip_suffix(ts_col)
                .map_or(false, |prefix| prefix.ends_with('_'))
    })
}

#[test]
fn recognizes_timestamp_columns() {
    assert!(is_timestamp_column("pickup_datetime"));
    assert!(is_timestamp_column("dropoff_datetime"));
    assert!(is_timestamp_column("tpep_pickup_datetime"));
    assert!(is_timestamp_column("lpep_Dropoff_Datetime"));
    assert!(!is_timestamp_column("xpickup_datetime"));
    assert!(!is_timestamp_column("pickup_date"));
    assert!(!is_timestamp_column("PULocationID"));
}

/// Parse a raw CSV cell as a timestamp.
///
/// Offsets in RFC 3339 values are applied, giving a UTC time.
pub(crate) fn parse_timestamp(cell: &str) -> Result<NaiveDateTime> {
    let cell = cell.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(cell, format) {
            return Ok(timestamp);
        }
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(cell) {
        return Ok(timestamp.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(cell, "%Y-%m-%d") {
        if let Some(timestamp) = date.and_hms_opt(0, 0, 0) {
            return Ok(timestamp);
        }
    }
    Err(format_err!("cannot parse {:?} as a timestamp", cell))
}

/// Format a timestamp the way PostgreSQL expects it.
pub(crate) fn canonical_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(CANONICAL_FORMAT).to_string()
}

#[test]
fn parse_timestamps() {
    let examples = &[
        ("2020-01-15 08:30:00", "2020-01-15 08:30:00"),
        ("2020-01-15T08:30:00", "2020-01-15 08:30:00"),
        (" 2020-01-15 08:30:00 ", "2020-01-15 08:30:00"),
        ("2020-01-15 08:30:00.25", "2020-01-15 08:30:00.250"),
        ("2020-01-15 08:30", "2020-01-15 08:30:00"),
        ("01/15/2020 08:30:00 PM", "2020-01-15 20:30:00"),
        ("01/15/2020 08:30:00", "2020-01-15 08:30:00"),
        ("2020-01-15T08:30:00-05:00", "2020-01-15 13:30:00"),
        ("2020-01-15", "2020-01-15 00:00:00"),
    ];
    for &(input, expected) in examples {
        let parsed = parse_timestamp(input).unwrap();
        assert_eq!(canonical_timestamp(&parsed), expected, "parsing {:?}", input);
    }
}

#[test]
fn reject_bad_timestamps() {
    for input in &["not-a-date", "2020-13-01 00:00:00", "2020-01-15 25:00:00"] {
        assert!(parse_timestamp(input).is_err(), "parsing {:?}", input);
    }
}

/// Rewrite every non-empty value in `columns` of `chunk` as a canonical
/// timestamp. Empty or whitespace-only values become empty strings, which are
/// loaded as `NULL`.
///
/// Fails on the first value that cannot be parsed. The chunk is left partly
/// rewritten in that case, so it should not be loaded.
pub(crate) fn normalize_chunk(chunk: &mut Chunk, columns: &[usize]) -> Result<()> {
    if columns.is_empty() {
        return Ok(());
    }
    for row in &mut chunk.rows {
        let mut normalized = StringRecord::with_capacity(row.as_slice().len(), row.len());
        for (idx, cell) in row.iter().enumerate() {
            if !columns.contains(&idx) {
                normalized.push_field(cell);
            } else if cell.trim().is_empty() {
                normalized.push_field("");
            } else {
                let timestamp = parse_timestamp(cell).map_err(|err| {
                    let line = row.position().map_or(0, |pos| pos.line());
                    let column = chunk.columns.get(idx).unwrap_or("?");
                    IngestError::Normalization(
                        err.context(format!("column {:?} on line {}", column, line)),
                    )
                })?;
                normalized.push_field(&canonical_timestamp(&timestamp));
            }
        }
        normalized.set_position(row.position().cloned());
        *row = normalized;
    }
    Ok(())
}
