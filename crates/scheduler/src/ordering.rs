//! Grouping & ordering of entity jobs.
//!
//! Jobs that write the same target ([`GroupKey`]) are kept contiguous and
//! ordered by the `_YYYYMMDDHHMM.<ext>` timestamp in their source file name.
//! A missing or malformed timestamp never aborts planning: such jobs sort
//! after every timestamped member of their group, in original order.

use chrono::{NaiveDate, NaiveDateTime};
use fmd_core::{GroupKey, Job};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

/// A job annotated with its group membership and position inside the group.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedJob {
    pub job: Job,
    /// Zero-based position within the job's group.
    pub order_index: usize,
    /// Number of jobs sharing this job's group.
    pub group_size: usize,
    /// Timestamp parsed from the source file name, if any.
    pub timestamp: Option<NaiveDateTime>,
}

impl PlannedJob {
    pub fn group_key(&self) -> &GroupKey {
        &self.job.group_key
    }
}

/// Extract `YYYYMMDDHHMM` from names like `Sales_Invoices_202601311402.parquet`.
///
/// Returns `None` when the name does not end in `_<12 digits>.<ext>` or the
/// digits do not form a valid calendar minute.
pub fn extract_timestamp(file_name: &str) -> Option<NaiveDateTime> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    let (_, digits) = stem.rsplit_once('_')?;
    if digits.len() != 12 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let num = |range: std::ops::Range<usize>| digits[range].parse::<u32>().ok();
    let year = digits[0..4].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, num(4..6)?, num(6..8)?)?.and_hms_opt(num(8..10)?, num(10..12)?, 0)
}

/// Group, order and flatten jobs.
///
/// Groups are emitted in order of first appearance; each group's members are
/// contiguous and sorted by `(timestamp, source_file_name)`, untimestamped
/// members last in original order. The function is idempotent.
pub fn order_jobs(jobs: Vec<Job>) -> Vec<PlannedJob> {
    let mut groups: IndexMap<GroupKey, Vec<(Option<NaiveDateTime>, Job)>> = IndexMap::new();
    for job in jobs {
        let ts = job.source_file_name.as_deref().and_then(extract_timestamp);
        if ts.is_none() {
            if let Some(name) = &job.source_file_name {
                debug!(job = %job.id, file = %name, "no parseable timestamp, ordering last in group");
            }
        }
        groups.entry(job.group_key.clone()).or_default().push((ts, job));
    }

    let mut ordered = Vec::new();
    for (_, mut members) in groups {
        // Stable sort: untimestamped members keep their relative order.
        members.sort_by(|(ts_a, a), (ts_b, b)| match (ts_a, ts_b) {
            (Some(x), Some(y)) => x
                .cmp(y)
                .then_with(|| a.source_file_name.cmp(&b.source_file_name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let group_size = members.len();
        ordered.extend(
            members
                .into_iter()
                .enumerate()
                .map(|(order_index, (timestamp, job))| PlannedJob {
                    job,
                    order_index,
                    group_size,
                    timestamp,
                }),
        );
    }
    ordered
}
