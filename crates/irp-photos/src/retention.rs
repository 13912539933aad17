// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retention purging over `_trash/` buckets.
//!
//! Buckets are named `<YYYY-MM-DDTHHMMSS>-<run_id>`, so lexicographic order
//! is chronological. The purger always preserves the `min_keep_count` newest
//! buckets; beyond that floor, buckets are evicted by age and by the per-job
//! size ceiling, oldest first. Eviction behaviour follows the policy mode:
//! delete outright, repack as a tarball under the archive directory, or
//! leave removal to an external process.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use irp_core::{PurgeMode, RetentionPolicy};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::TRASH_DIR;

/// Timestamp prefix length of a bucket name (`YYYY-MM-DDTHHMMSS`).
const TS_PREFIX_LEN: usize = 17;

/// What one purge pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    /// Buckets still present after the pass.
    pub kept: Vec<String>,
    /// Buckets removed outright.
    pub deleted: Vec<String>,
    /// Buckets repacked under the archive directory.
    pub compressed: Vec<String>,
    /// Buckets flagged for external eviction.
    pub flagged: Vec<String>,
}

#[derive(Debug)]
struct Bucket {
    name: String,
    path: PathBuf,
    created: NaiveDateTime,
    size: u64,
}

/// Run one retention pass over `photos_dir/_trash/`.
///
/// # Errors
///
/// Fails on unreadable directories or failed evictions; a bucket with an
/// unparseable name is skipped with a warning rather than evicted.
pub fn purge_trash(
    photos_dir: &Path,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<PurgeReport> {
    let trash = photos_dir.join(TRASH_DIR);
    let mut report = PurgeReport::default();

    let entries = match fs::read_dir(&trash) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e).with_context(|| format!("read {}", trash.display())),
    };

    let mut buckets = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(created) = parse_bucket_timestamp(&name) else {
            warn!(target: "irp.photos", bucket = %name, "unparseable bucket name; leaving in place");
            continue;
        };
        let path = entry.path();
        buckets.push(Bucket {
            size: dir_size(&path),
            name,
            path,
            created,
        });
    }

    // Newest first; the keep floor protects the head of this list.
    buckets.sort_by(|a, b| b.name.cmp(&a.name));

    let mut total: u64 = buckets.iter().map(|b| b.size).sum();
    let mut evict = Vec::new();
    let mut kept: Vec<&Bucket> = Vec::new();

    for (idx, bucket) in buckets.iter().enumerate() {
        if idx < policy.min_keep_count {
            kept.push(bucket);
            continue;
        }
        let age_days = (now.naive_utc() - bucket.created).num_days();
        if age_days > i64::from(policy.days) {
            evict.push(bucket);
            total = total.saturating_sub(bucket.size);
        } else {
            kept.push(bucket);
        }
    }

    // Still over the per-job ceiling: shed the oldest unprotected buckets.
    // `kept` is newest-first, so the tail is the oldest.
    while total > policy.per_job_bytes && kept.len() > policy.min_keep_count {
        let Some(bucket) = kept.pop() else { break };
        total = total.saturating_sub(bucket.size);
        evict.push(bucket);
    }

    for bucket in &evict {
        match policy.mode {
            PurgeMode::Delete => {
                fs::remove_dir_all(&bucket.path)
                    .with_context(|| format!("delete bucket {}", bucket.path.display()))?;
                debug!(target: "irp.photos", bucket = %bucket.name, "bucket deleted");
                report.deleted.push(bucket.name.clone());
            }
            PurgeMode::Compress => {
                compress_bucket(photos_dir, policy, bucket)?;
                fs::remove_dir_all(&bucket.path)
                    .with_context(|| format!("remove compressed bucket {}", bucket.path.display()))?;
                report.compressed.push(bucket.name.clone());
            }
            PurgeMode::External => {
                debug!(target: "irp.photos", bucket = %bucket.name, "bucket flagged for external eviction");
                report.flagged.push(bucket.name.clone());
            }
        }
    }

    report.kept = match policy.mode {
        // External mode removes nothing.
        PurgeMode::External => buckets.iter().map(|b| b.name.clone()).collect(),
        _ => {
            let mut names: Vec<String> = kept.iter().map(|b| b.name.clone()).collect();
            names.sort_by(|a, b| b.cmp(a));
            names
        }
    };
    Ok(report)
}

/// `<TS>-<run_id>` → the timestamp, or `None` when the shape is off.
fn parse_bucket_timestamp(name: &str) -> Option<NaiveDateTime> {
    if name.len() <= TS_PREFIX_LEN || name.as_bytes().get(TS_PREFIX_LEN) != Some(&b'-') {
        return None;
    }
    NaiveDateTime::parse_from_str(&name[..TS_PREFIX_LEN], "%Y-%m-%dT%H%M%S").ok()
}

/// Repack one bucket as `<archive_dir>/<TS>_<run_id>.tar.gz`.
fn compress_bucket(photos_dir: &Path, policy: &RetentionPolicy, bucket: &Bucket) -> Result<()> {
    let archive_dir = photos_dir.join(&policy.archive_dir);
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("create {}", archive_dir.display()))?;

    // `<TS>-<id>` becomes `<TS>_<id>.tar.gz` in the archive tier.
    let archive_name = format!(
        "{}_{}.tar.gz",
        &bucket.name[..TS_PREFIX_LEN],
        &bucket.name[TS_PREFIX_LEN + 1..]
    );
    let archive_path = archive_dir.join(&archive_name);

    let file = fs::File::create(&archive_path)
        .with_context(|| format!("create {}", archive_path.display()))?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(&bucket.name, &bucket.path)
        .with_context(|| format!("pack bucket {}", bucket.name))?;
    let encoder = builder.into_inner().context("finish tar stream")?;
    encoder.finish().context("finish gzip stream")?;

    debug!(target: "irp.photos", bucket = %bucket.name, archive = %archive_name, "bucket compressed");
    Ok(())
}

/// Total size of regular files under `path`.
fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- 1. Bucket timestamp parsing -----------------------------------------

    #[test]
    fn bucket_timestamp_parses() {
        let ts = parse_bucket_timestamp("2024-01-15T103000-abcd").unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-15 10:30:00");
        assert!(parse_bucket_timestamp("not-a-bucket").is_none());
        assert!(parse_bucket_timestamp("2024-01-15T103000").is_none());
    }

    // -- 2. Archive names swap the separator ----------------------------------

    #[test]
    fn archive_name_swaps_separator() {
        let name = "2024-01-15T103000-runid";
        let archive = format!(
            "{}_{}.tar.gz",
            &name[..TS_PREFIX_LEN],
            &name[TS_PREFIX_LEN + 1..]
        );
        assert_eq!(archive, "2024-01-15T103000_runid.tar.gz");
    }
}
