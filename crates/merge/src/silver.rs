//! Bronze → silver load through the SCD2 engine.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cleansing::{CleansingRegistry, CleansingRule};
use crate::engine::{merge_at, MergeOutcome};
use crate::error::{CleansingError, MergeError};
use crate::hash::non_key_hash;
use crate::record::ChangeRecord;
use crate::store::VersionedTableStore;

pub fn load_silver(
    store: &dyn VersionedTableStore,
    registry: &CleansingRegistry,
    bronze_table: &str,
    silver_table: &str,
    rules: &[CleansingRule],
) -> Result<MergeOutcome, MergeError> {
    load_silver_at(store, registry, bronze_table, silver_table, rules, Utc::now())
}

/// Read live bronze rows, cleanse, rehash and merge them into `silver_table`.
///
/// The bronze primary-key digest is carried over unchanged; the non-key
/// digest is recomputed over every payload column after cleansing.
pub fn load_silver_at(
    store: &dyn VersionedTableStore,
    registry: &CleansingRegistry,
    bronze_table: &str,
    silver_table: &str,
    rules: &[CleansingRule],
    now: DateTime<Utc>,
) -> Result<MergeOutcome, MergeError> {
    let bronze: Vec<_> = store
        .read_current(bronze_table)?
        .into_iter()
        .filter(|r| !r.is_deleted)
        .collect();
    debug!(bronze_table, rows = bronze.len(), "bronze rows read");

    let (key_hashes, payloads): (Vec<String>, Vec<_>) = bronze
        .into_iter()
        .map(|r| (r.primary_key_hash, r.payload))
        .unzip();
    let payloads = registry.apply(payloads, rules)?;
    if payloads.len() != key_hashes.len() {
        return Err(CleansingError::FunctionFailed {
            function: "cleansing".into(),
            message: format!("row count changed from {} to {}", key_hashes.len(), payloads.len()),
        }
        .into());
    }

    let changes = key_hashes
        .into_iter()
        .zip(payloads)
        .map(|(primary_key_hash, payload)| ChangeRecord {
            non_key_hash: non_key_hash(&payload, &[]),
            primary_key_hash,
            payload,
        })
        .collect();

    merge_at(store, silver_table, changes, now)
}
