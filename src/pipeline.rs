//! Scrape pipeline orchestration.
//!
//! One run is fetch (or cache hit), parse, register, export. The run lock
//! makes concurrent invocations against the same data directory mutually
//! exclusive, including across processes.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::config::Config;
use crate::db::{self, Database};
use crate::export;
use crate::fetcher::{self, ListingFetcher};
use crate::fs_utils;
use crate::lock::RunLock;
use crate::parser;

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub source_file: String,
    pub parsed_jobs: usize,
    /// False when the artifact was already registered (cache-window reuse).
    pub registered: bool,
}

#[derive(Debug, Serialize)]
struct ParseRunRecord<'a> {
    timestamp: String,
    source_file: &'a str,
    parsed_jobs: usize,
}

/// Run one full pipeline cycle.
///
/// A raw artifact younger than the cache window is reused instead of
/// driving the browser; re-parsing it yields an identical snapshot, and the
/// already-registered source file makes registration a no-op.
///
/// # Errors
///
/// Returns an error if another run holds the lock, the fetch fails or hits
/// its wall-clock deadline, the artifact cannot be parsed, or registration
/// hits a data-integrity violation.
pub async fn run_once(
    config: &Config,
    db: &Database,
    fetcher: &ListingFetcher,
) -> Result<RunOutcome> {
    let _lock = RunLock::acquire(config.lock_path())?;

    let artifact = match fetcher::find_recent_artifact(&config.data_dir, config.cache_window)
        .await?
    {
        Some(path) => {
            info!(path = %path.display(), "Reusing listing artifact within cache window");
            path
        }
        None => fetcher.fetch_listing().await?,
    };

    let raw = tokio::fs::read(&artifact)
        .await
        .with_context(|| format!("Failed to read artifact: {}", artifact.display()))?;
    let content_hash = hex::encode(Sha256::digest(&raw));

    let snapshot = parser::parse_artifact(&artifact, &config.data_dir).await?;
    parser::write_snapshot(&snapshot, &artifact).await?;

    let registered = if db::get_snapshot_by_source_file(db.pool(), &snapshot.source_file)
        .await?
        .is_some()
    {
        info!(
            source_file = %snapshot.source_file,
            "Snapshot already registered; skipping fold"
        );
        false
    } else {
        let snapshot_id = db::register_snapshot(db.pool(), &snapshot, &content_hash).await?;
        info!(
            snapshot_id,
            source_file = %snapshot.source_file,
            parsed_jobs = snapshot.post_count,
            "Snapshot registered"
        );
        true
    };

    export::write_all(config, db).await?;

    let record = ParseRunRecord {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        source_file: &snapshot.source_file,
        parsed_jobs: snapshot.post_count,
    };
    fs_utils::append_jsonl(&config.stats_log_path(), &record)
        .await
        .context("Failed to append parse statistics record")?;

    Ok(RunOutcome {
        source_file: snapshot.source_file,
        parsed_jobs: snapshot.post_count,
        registered,
    })
}

/// Run the scrape pipeline forever at the configured interval.
pub async fn run_loop(config: &Config, db: &Database, fetcher: &ListingFetcher) {
    loop {
        match run_once(config, db, fetcher).await {
            Ok(outcome) => {
                info!(
                    source_file = %outcome.source_file,
                    parsed_jobs = outcome.parsed_jobs,
                    registered = outcome.registered,
                    "Pipeline run complete"
                );
            }
            Err(e) => {
                error!("Pipeline run error: {e:#}");
            }
        }

        tokio::time::sleep(config.scrape_interval).await;
    }
}
