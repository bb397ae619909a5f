//! Change hashing and versioned merges for the bronze and silver layers.

pub mod bronze;
pub mod cleansing;
pub mod engine;
pub mod error;
pub mod hash;
pub mod record;
pub mod silver;
pub mod store;

pub use bronze::{load_bronze, load_bronze_at, normalize_column_names, BronzeOptions};
pub use cleansing::{parse_rules, CleansingRegistry, CleansingRule};
pub use engine::{merge, merge_at, plan_scd2, MergeOutcome, MergeSummary};
pub use error::{CleansingError, HashError, MergeError, StoreError};
pub use hash::{hash_columns, non_key_hash, parse_primary_keys, primary_key_hash, to_change_set};
pub use record::{end_of_time, ChangeRecord, VersionedRecord};
pub use silver::{load_silver, load_silver_at};
pub use store::{
    qualified_table_name, FileTableStore, MemoryTableStore, MergeAction, VersionedTableStore,
};
