//! Hash engine: row digests for primary-key identity and change detection.
//!
//! A digest is the SHA-256 hex of the listed columns' canonical values
//! joined by `||`, in the order the columns are listed. Values are looked up
//! by name, so the row's own column order never affects the result.

use std::collections::HashSet;

use fmd_core::{Dataset, FieldValue, Row};
use sha2::{Digest, Sha256};

use crate::error::{HashError, MergeError};
use crate::record::ChangeRecord;

const SEPARATOR: &str = "||";

/// Split a `PrimaryKeys` parameter on `,` `;` `:` or space.
pub fn parse_primary_keys(raw: &str) -> Vec<String> {
    raw.split([',', ';', ':', ' '])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Digest of `columns` in declared order. Absent columns hash as null.
pub fn hash_columns<S: AsRef<str>>(row: &Row, columns: &[S]) -> String {
    let joined = columns
        .iter()
        .map(|c| row.get(c.as_ref()).map(FieldValue::canonical).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    let digest = Sha256::digest(joined.as_bytes());
    format!("{digest:x}")
}

/// Columns not in `keys`, sorted by name.
pub fn non_key_columns<'a>(row: &'a Row, keys: &[String]) -> Vec<&'a str> {
    let mut cols: Vec<&str> = row
        .keys()
        .map(String::as_str)
        .filter(|c| !keys.iter().any(|k| k == c))
        .collect();
    cols.sort_unstable();
    cols
}

/// Primary-key digest; every key column must be present in the row.
pub fn primary_key_hash(row: &Row, keys: &[String], row_index: usize) -> Result<String, HashError> {
    if keys.is_empty() {
        return Err(HashError::NoKeyColumns);
    }
    if let Some(missing) = keys.iter().find(|k| !row.contains_key(k.as_str())) {
        return Err(HashError::MissingKeyColumn {
            column: missing.clone(),
            row: row_index,
        });
    }
    Ok(hash_columns(row, keys))
}

/// Digest over every non-key column of the row.
pub fn non_key_hash(row: &Row, keys: &[String]) -> String {
    hash_columns(row, non_key_columns(row, keys).as_slice())
}

/// Hash every row into a change-set. Duplicate keys are fatal.
pub fn to_change_set(rows: Dataset, keys: &[String]) -> Result<Vec<ChangeRecord>, MergeError> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut out = Vec::with_capacity(rows.len());
    for (i, payload) in rows.into_iter().enumerate() {
        let pk = primary_key_hash(&payload, keys, i)?;
        if !seen.insert(pk.clone()) {
            return Err(MergeError::DuplicateKey(describe_key(&payload, keys)));
        }
        out.push(ChangeRecord {
            non_key_hash: non_key_hash(&payload, keys),
            primary_key_hash: pk,
            payload,
        });
    }
    Ok(out)
}

/// Human-readable key values for error messages.
pub(crate) fn describe_key(row: &Row, keys: &[String]) -> String {
    keys.iter()
        .map(|k| {
            let v = row.get(k).map(FieldValue::canonical).unwrap_or_default();
            format!("{k}={v}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
