//! Landing-zone file reader.
//!
//! Accepts a JSON array of objects, a single JSON object, or JSON Lines
//! (`.jsonl` / `.ndjson`, one object per line, blank lines ignored).

use std::fs;
use std::path::Path;

use fmd_core::{row_from_json, Dataset};
use serde_json::Value;

use crate::error::JobError;

pub fn read_rows(path: &Path) -> Result<Dataset, JobError> {
    let content = fs::read_to_string(path).map_err(|source| JobError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_lines = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl") | Some("ndjson")
    );
    if is_lines {
        parse_lines(path, &content)
    } else {
        parse_document(path, &content)
    }
}

fn parse_error(path: &Path, message: impl Into<String>) -> JobError {
    JobError::Parse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn to_row(path: &Path, value: &Value, at: &str) -> Result<fmd_core::Row, JobError> {
    row_from_json(value).ok_or_else(|| parse_error(path, format!("{at}: expected a JSON object")))
}

fn parse_document(path: &Path, content: &str) -> Result<Dataset, JobError> {
    let value: Value = serde_json::from_str(content).map_err(|e| parse_error(path, e.to_string()))?;
    match &value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| to_row(path, item, &format!("element {i}")))
            .collect(),
        Value::Object(_) => Ok(vec![to_row(path, &value, "document")?]),
        _ => Err(parse_error(path, "expected an array of objects")),
    }
}

fn parse_lines(path: &Path, content: &str) -> Result<Dataset, JobError> {
    let mut rows = Dataset::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|e| parse_error(path, format!("line {}: {e}", i + 1)))?;
        rows.push(to_row(path, &value, &format!("line {}", i + 1))?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmd_core::FieldValue;
    use tempfile::TempDir;

    #[test]
    fn reads_json_array() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("orders_202601010000.json");
        fs::write(&path, r#"[{"Id": 1, "Name": "a"}, {"Id": 2, "Name": null}]"#).unwrap();
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Id"], FieldValue::Integer(1));
        assert_eq!(rows[1]["Name"], FieldValue::Null);
    }

    #[test]
    fn reads_json_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("orders.jsonl");
        fs::write(&path, "{\"Id\": 1}\n\n{\"Id\": 2}\n").unwrap();
        assert_eq!(read_rows(&path).unwrap().len(), 2);
    }

    #[test]
    fn reports_bad_lines_with_position() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("orders.jsonl");
        fs::write(&path, "{\"Id\": 1}\n[1, 2]\n").unwrap();
        let err = read_rows(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        let err = read_rows(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, JobError::Read { .. }));
    }
}
