//! Unit tests for pg-backup-core.

pub mod backup;
pub mod helpers;
pub mod restore;
