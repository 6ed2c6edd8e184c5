//! Snapshot file naming.
//!
//! The retention pass relies on this encoding to date remote objects, so the
//! format is fixed: `backup-<YYYY>-<MM>-<DD>T<HH>-<MM>-<SS>-<mmm>Z.sql`, i.e.
//! the RFC 3339 UTC instant with millisecond precision where `:` and `.` have
//! been replaced by `-`.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Leading part of every snapshot file name
pub const SNAPSHOT_FILE_PREFIX: &str = "backup-";

/// Trailing part of every snapshot file name
pub const SNAPSHOT_FILE_SUFFIX: &str = ".sql";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Drop sub-millisecond precision so the instant survives the file name
pub fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(3)
}

/// File name for a snapshot created at `created_at`
pub fn snapshot_file_name(created_at: &DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        SNAPSHOT_FILE_PREFIX,
        created_at.format(TIMESTAMP_FORMAT),
        SNAPSHOT_FILE_SUFFIX
    )
}

/// Extract the creation instant from a snapshot file name.
///
/// Only names that [`snapshot_file_name`] could have produced are accepted;
/// anything else returns `None`.
pub fn parse_snapshot_file_name(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name
        .strip_prefix(SNAPSHOT_FILE_PREFIX)?
        .strip_suffix(SNAPSHOT_FILE_SUFFIX)?;

    let created_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();

    // Reject lenient parses (unpadded fields and the like)
    if snapshot_file_name(&created_at) != file_name {
        return None;
    }

    Some(created_at)
}

/// Extract the creation instant from a remote key under `prefix`.
///
/// Keys outside the prefix, or nested deeper than the prefix, are not
/// snapshots written by this tool.
pub fn parse_snapshot_key(key: &str, prefix: &str) -> Option<DateTime<Utc>> {
    let file_name = key.strip_prefix(prefix)?;
    if file_name.contains('/') {
        return None;
    }
    parse_snapshot_file_name(file_name)
}
