use chrono::{DateTime, Utc};
use fmd_core::Row;
use serde::{Deserialize, Serialize};

/// Seconds since the epoch for 9999-12-31T00:00:00Z.
const END_OF_TIME_SECS: i64 = 253_402_214_400;

/// Sentinel `RecordEndDate` of an open row.
pub fn end_of_time() -> DateTime<Utc> {
    DateTime::from_timestamp(END_OF_TIME_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Incoming row after hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub primary_key_hash: String,
    pub non_key_hash: String,
    pub payload: Row,
}

/// One version of a key in a target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord {
    pub primary_key_hash: String,
    pub non_key_hash: String,
    pub payload: Row,
    #[serde(rename = "IsCurrent")]
    pub is_current: bool,
    #[serde(rename = "IsDeleted")]
    pub is_deleted: bool,
    #[serde(rename = "RecordStartDate")]
    pub record_start_date: DateTime<Utc>,
    #[serde(rename = "RecordEndDate")]
    pub record_end_date: DateTime<Utc>,
    #[serde(rename = "RecordModifiedDate")]
    pub record_modified_date: DateTime<Utc>,
}

impl VersionedRecord {
    /// Open, live version of `change` starting at `now`.
    pub fn open(change: ChangeRecord, now: DateTime<Utc>) -> Self {
        Self {
            primary_key_hash: change.primary_key_hash,
            non_key_hash: change.non_key_hash,
            payload: change.payload,
            is_current: true,
            is_deleted: false,
            record_start_date: now,
            record_end_date: end_of_time(),
            record_modified_date: now,
        }
    }

    /// Deletion marker for a key that disappeared from the source at `now`.
    pub fn tombstone(of: &VersionedRecord, now: DateTime<Utc>) -> Self {
        Self {
            primary_key_hash: of.primary_key_hash.clone(),
            non_key_hash: of.non_key_hash.clone(),
            payload: of.payload.clone(),
            is_current: true,
            is_deleted: true,
            record_start_date: now,
            record_end_date: now,
            record_modified_date: now,
        }
    }

    /// Current and not deleted.
    pub fn is_live(&self) -> bool {
        self.is_current && !self.is_deleted
    }
}
