//! Boundary files: raw rows in, canonical rows and intermediates out.
//!
//! Rows files hold one row per line, each a list of `[head, relation, tail]`
//! triples. Lines may be JSON or Python literal syntax. A line's position is
//! its `row_id`, so blank or unreadable lines become empty rows rather than
//! disappearing.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CanonError, Result};
use crate::pipeline::decode::parse_value;
use crate::types::triple::{RawRow, RawTriple};

/// Parse one rows-file line.
pub fn parse_row(line: &str, line_no: usize) -> Result<RawRow> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value = parse_value(trimmed).ok_or_else(|| CanonError::InvalidRecord {
        line: line_no,
        reason: "not a JSON or literal list".into(),
    })?;
    let Value::Array(items) = value else {
        return Err(CanonError::InvalidRecord {
            line: line_no,
            reason: "row is not a list".into(),
        });
    };

    let mut row = Vec::with_capacity(items.len());
    for item in &items {
        match triple_from_value(item) {
            Some(triple) => row.push(triple),
            None => warn!(line = line_no, item = %item, "Skipping malformed triple"),
        }
    }
    Ok(row)
}

fn triple_from_value(value: &Value) -> Option<RawTriple> {
    let parts = value.as_array()?;
    if parts.len() != 3 {
        return None;
    }
    let text = |v: &Value| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    Some(RawTriple::new(text(&parts[0])?, text(&parts[1])?, text(&parts[2])?))
}

/// Read a rows file. Unreadable lines are logged and kept as empty rows.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<RawRow>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut rows = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_row(&line, index + 1) {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(error = %e, "Keeping unreadable line as an empty row");
                rows.push(Vec::new());
            }
        }
    }

    debug!(path = %path.as_ref().display(), rows = rows.len(), "Rows read");
    Ok(rows)
}

/// Write one JSON row per line.
pub fn write_rows(path: impl AsRef<Path>, rows: &[RawRow]) -> Result<()> {
    write_jsonl(path, rows)
}

/// Read a JSON Lines file. Malformed lines are logged and skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = index + 1, error = %e, "Skipping malformed record"),
        }
    }
    Ok(records)
}

/// Write records as JSON Lines.
pub fn write_jsonl<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one pretty-printed JSON document.
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
