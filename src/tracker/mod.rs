//! Deduplicating job tracker.
//!
//! Folds an ordered sequence of snapshots into the canonical set of tracked
//! jobs, one per posting identifier. Replaying the same ordered snapshot
//! sequence always yields the same map, whether applied all at once or in
//! chunks.
//!
//! A posting's disappearance from later snapshots is not evidence of
//! closure: the listing page only shows a bounded set, so absence is
//! ambiguous. Closure is derived solely from the most recent status-history
//! entry.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::{Posting, PostingStatus, Snapshot};

#[derive(Debug, Error)]
pub enum TrackError {
    #[error(
        "snapshot {source_file} at {captured_at} is older than the previously applied snapshot at {last_applied}"
    )]
    OutOfOrderSnapshot {
        source_file: String,
        captured_at: DateTime<Utc>,
        last_applied: DateTime<Utc>,
    },
    #[error("snapshot {source_file} was already applied")]
    DuplicateSnapshot { source_file: String },
}

/// One status observation from one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub seen_at: DateTime<Utc>,
    pub status: PostingStatus,
}

/// The deduplicated, longitudinal view of one posting identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedJob {
    pub post_id: i64,
    pub position: String,
    pub unit_name: String,
    pub url: String,
    pub image_url: String,
    pub categories: Vec<String>,
    pub units: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub appearance_count: u32,
    pub status_history: Vec<StatusEntry>,
}

impl TrackedJob {
    fn new(posting: &Posting, seen_at: DateTime<Utc>) -> Self {
        Self {
            post_id: posting.post_id,
            position: posting.position.clone(),
            unit_name: posting.unit_name.clone(),
            url: posting.url.clone(),
            image_url: posting.image_url.clone(),
            categories: posting.categories.clone(),
            units: posting.units.clone(),
            first_seen: seen_at,
            last_seen: seen_at,
            appearance_count: 1,
            status_history: vec![StatusEntry {
                seen_at,
                status: posting.status,
            }],
        }
    }

    fn observe(&mut self, posting: &Posting, seen_at: DateTime<Utc>) {
        // Descriptive fields: latest snapshot wins.
        self.position = posting.position.clone();
        self.unit_name = posting.unit_name.clone();
        self.url = posting.url.clone();
        self.image_url = posting.image_url.clone();
        self.categories = posting.categories.clone();
        self.units = posting.units.clone();

        self.last_seen = seen_at;
        self.appearance_count += 1;
        self.status_history.push(StatusEntry {
            seen_at,
            status: posting.status,
        });
    }

    /// The most recently observed status.
    #[must_use]
    pub fn current_status(&self) -> PostingStatus {
        self.status_history
            .last()
            .map_or(PostingStatus::Open, |e| e.status)
    }

    /// Whether the job is currently closed, i.e. the latest observation
    /// carried the closed marker.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.current_status() == PostingStatus::Closed
    }
}

/// Incremental fold state over an ordered snapshot sequence.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: BTreeMap<i64, TrackedJob>,
    applied_sources: HashSet<String>,
    last_applied: Option<DateTime<Utc>>,
}

impl JobTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one snapshot to the tracked set.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::OutOfOrderSnapshot`] if the snapshot is older
    /// than the last applied one, or [`TrackError::DuplicateSnapshot`] if
    /// the same source file is applied twice. Both are data-integrity
    /// violations: the caller must halt rather than continue with an
    /// inconsistent map.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), TrackError> {
        if let Some(last_applied) = self.last_applied {
            if snapshot.parsed_at < last_applied {
                return Err(TrackError::OutOfOrderSnapshot {
                    source_file: snapshot.source_file.clone(),
                    captured_at: snapshot.parsed_at,
                    last_applied,
                });
            }
        }
        if !self.applied_sources.insert(snapshot.source_file.clone()) {
            return Err(TrackError::DuplicateSnapshot {
                source_file: snapshot.source_file.clone(),
            });
        }

        for posting in &snapshot.posts {
            self.jobs
                .entry(posting.post_id)
                .and_modify(|job| job.observe(posting, snapshot.parsed_at))
                .or_insert_with(|| TrackedJob::new(posting, snapshot.parsed_at));
        }

        self.last_applied = Some(snapshot.parsed_at);
        Ok(())
    }

    #[must_use]
    pub fn jobs(&self) -> &BTreeMap<i64, TrackedJob> {
        &self.jobs
    }

    #[must_use]
    pub fn into_jobs(self) -> BTreeMap<i64, TrackedJob> {
        self.jobs
    }
}

/// Fold an ordered snapshot sequence into the canonical tracked-job map.
///
/// # Errors
///
/// Returns a [`TrackError`] on out-of-order or duplicate snapshots.
pub fn replay<'a, I>(snapshots: I) -> Result<BTreeMap<i64, TrackedJob>, TrackError>
where
    I: IntoIterator<Item = &'a Snapshot>,
{
    let mut tracker = JobTracker::new();
    for snapshot in snapshots {
        tracker.apply_snapshot(snapshot)?;
    }
    Ok(tracker.into_jobs())
}
