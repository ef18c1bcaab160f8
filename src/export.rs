//! Dashboard-facing JSON exports.
//!
//! Two artifacts are rewritten after every successful pipeline run: the
//! consolidated unique-job dump at the data-directory root, and the snapshot
//! file index consumed by the dashboard's file browser.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::constants::{CONSOLIDATED_FILE_NAME, RAW_ARTIFACT_PREFIX};
use crate::db::{self, Database};
use crate::fs_utils;
use crate::parser;
use crate::tracker::TrackedJob;

/// The consolidated export: every unique tracked job with full history.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConsolidatedExport {
    pub generated_at: String,
    pub total_unique_jobs: usize,
    pub jobs: Vec<TrackedJob>,
}

/// One entry in the snapshot file index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFileEntry {
    /// Path relative to the data directory.
    pub path: String,
    pub name: String,
    /// Capture timestamp from the filename, RFC 3339.
    pub date: String,
}

/// The snapshot file index, newest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotFileIndex {
    pub files: Vec<SnapshotFileEntry>,
    pub count: usize,
}

/// Rewrite both exports from current database state.
///
/// # Errors
///
/// Returns an error if the tracked jobs cannot be loaded or a file cannot
/// be written.
pub async fn write_all(config: &Config, db: &Database) -> Result<()> {
    write_consolidated(config, db).await?;
    write_file_index(config).await?;
    Ok(())
}

/// Write the consolidated unique-job dump to the data-directory root.
///
/// # Errors
///
/// Returns an error on database or write failures.
pub async fn write_consolidated(config: &Config, db: &Database) -> Result<()> {
    let jobs = db::get_all_tracked_jobs(db.pool()).await?;
    let export = ConsolidatedExport {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        total_unique_jobs: jobs.len(),
        jobs: jobs.into_values().collect(),
    };

    let path = config.data_dir.join(CONSOLIDATED_FILE_NAME);
    fs_utils::write_json_atomic(&path, &export)
        .await
        .context("Failed to write consolidated export")?;
    debug!(path = %path.display(), jobs = export.total_unique_jobs, "Consolidated export written");
    Ok(())
}

/// Write the snapshot file index to the api directory.
///
/// # Errors
///
/// Returns an error if the data directory cannot be scanned or the index
/// cannot be written.
pub async fn write_file_index(config: &Config) -> Result<()> {
    let index = build_file_index(&config.data_dir).await?;
    let path = config.api_dir().join("list-json-files.json");
    fs_utils::write_json_atomic(&path, &index)
        .await
        .context("Failed to write snapshot file index")?;
    debug!(path = %path.display(), count = index.count, "Snapshot file index written");
    Ok(())
}

/// Scan the data directory for snapshot JSON mirrors, newest first.
async fn build_file_index(data_dir: &Path) -> Result<SnapshotFileIndex> {
    let paths = fs_utils::collect_files(data_dir, RAW_ARTIFACT_PREFIX, ".json").await?;

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        // Artifacts with a malformed timestamp never enter the pipeline;
        // the index skips them the same way.
        let Ok(captured_at) = parser::captured_at_from_path(&path) else {
            continue;
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative = path
            .strip_prefix(data_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");

        files.push(SnapshotFileEntry {
            path: relative,
            name,
            date: captured_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
    }

    files.sort_by(|a, b| b.date.cmp(&a.date));
    let count = files.len();
    Ok(SnapshotFileIndex { files, count })
}
