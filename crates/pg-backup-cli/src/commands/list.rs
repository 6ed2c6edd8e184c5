use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use pg_backup_core::snapshot::parse_snapshot_key;
use pg_backup_core::{Config, ObjectMetadata};
use serde::Serialize;
use tracing::info;

use super::{OutputFormat, Services};

/// One listed snapshot
#[derive(Debug, Serialize)]
struct SnapshotEntry {
    key: String,
    created_at: DateTime<Utc>,
    size_bytes: u64,
    age_days: i64,
}

pub async fn run(format: &str) -> Result<()> {
    let services = Services::from_env()?;
    let prefix = services.config.storage.prefix.clone();

    info!(
        "Listing snapshots in {}/{}",
        services.config.storage.bucket, prefix
    );
    let objects: Vec<ObjectMetadata> = services.gateway.list(&prefix).try_collect().await?;
    let entries = snapshot_entries(&services.config, objects, Utc::now());

    match OutputFormat::from(format) {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(&entries)?);
        }
        OutputFormat::Text => print_entries_text(&entries, &services.config),
    }

    Ok(())
}

/// Snapshots among `objects`, newest first
fn snapshot_entries(
    config: &Config,
    objects: Vec<ObjectMetadata>,
    now: DateTime<Utc>,
) -> Vec<SnapshotEntry> {
    let mut entries: Vec<SnapshotEntry> = objects
        .into_iter()
        .filter_map(|meta| {
            let created_at = parse_snapshot_key(&meta.key, &config.storage.prefix)?;
            Some(SnapshotEntry {
                age_days: (now - created_at).num_days(),
                created_at,
                size_bytes: meta.size,
                key: meta.key,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entries
}

fn print_entries_text(entries: &[SnapshotEntry], config: &Config) {
    if entries.is_empty() {
        println!(
            "No snapshots found in {}/{}",
            config.storage.bucket, config.storage.prefix
        );
        return;
    }

    let retention = config.backup.retention;
    println!("{:<60} {:>14} {:>8}", "KEY", "SIZE (BYTES)", "AGE (D)");
    for entry in entries {
        let marker = if retention.is_enabled() && entry.age_days >= i64::from(retention.retention_days)
        {
            "  (expiring)"
        } else {
            ""
        };
        println!(
            "{:<60} {:>14} {:>8}{}",
            entry.key, entry.size_bytes, entry.age_days, marker
        );
    }
    println!("\n{} snapshot(s)", entries.len());
}
