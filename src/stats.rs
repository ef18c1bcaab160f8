//! Aggregate statistics over the tracked-job map.
//!
//! All computations here are pure functions over the canonical map, so the
//! dashboard and exports always agree with the fold state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracker::TrackedJob;

/// One recruiting unit with its posting count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCount {
    pub unit_name: String,
    pub count: usize,
}

/// Summary statistics over the full tracked set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerSummary {
    pub total_unique: usize,
    pub open_count: usize,
    pub closed_count: usize,
    /// Jobs observed in exactly one snapshot.
    pub one_time_count: usize,
    /// Identifiers of those one-snapshot jobs, ascending.
    pub one_time_post_ids: Vec<i64>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub top_units: Vec<UnitCount>,
    /// Appearance count to number of jobs with that count.
    pub appearance_histogram: BTreeMap<u32, usize>,
}

/// Summarize the tracked-job map.
///
/// `top_n` bounds the unit leaderboard; units tie-break alphabetically.
#[must_use]
pub fn summarize(jobs: &BTreeMap<i64, TrackedJob>, top_n: usize) -> TrackerSummary {
    let mut summary = TrackerSummary {
        total_unique: jobs.len(),
        ..TrackerSummary::default()
    };

    let mut unit_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for job in jobs.values() {
        if job.is_closed() {
            summary.closed_count += 1;
        } else {
            summary.open_count += 1;
        }
        if job.appearance_count == 1 {
            summary.one_time_count += 1;
        }

        summary.first_seen = Some(match summary.first_seen {
            Some(first) if first <= job.first_seen => first,
            _ => job.first_seen,
        });
        summary.last_seen = Some(match summary.last_seen {
            Some(last) if last >= job.last_seen => last,
            _ => job.last_seen,
        });

        if !job.unit_name.is_empty() {
            *unit_counts.entry(job.unit_name.as_str()).or_default() += 1;
        }
        *summary
            .appearance_histogram
            .entry(job.appearance_count)
            .or_default() += 1;
    }

    let mut units: Vec<UnitCount> = unit_counts
        .into_iter()
        .map(|(unit_name, count)| UnitCount {
            unit_name: unit_name.to_string(),
            count,
        })
        .collect();
    // BTreeMap iteration already gives the alphabetical tie-break.
    units.sort_by(|a, b| b.count.cmp(&a.count));
    units.truncate(top_n);
    summary.top_units = units;

    summary.one_time_post_ids = one_time_postings(jobs).iter().map(|j| j.post_id).collect();

    summary
}

/// Jobs observed in exactly one snapshot, in identifier order.
#[must_use]
pub fn one_time_postings(jobs: &BTreeMap<i64, TrackedJob>) -> Vec<&TrackedJob> {
    jobs.values().filter(|j| j.appearance_count == 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PostingStatus;
    use crate::tracker::StatusEntry;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 10, hour, 0, 0).unwrap()
    }

    fn job(post_id: i64, unit: &str, appearances: u32, status: PostingStatus) -> TrackedJob {
        TrackedJob {
            post_id,
            position: format!("Position {post_id}"),
            unit_name: unit.to_string(),
            url: String::new(),
            image_url: String::new(),
            categories: vec![],
            units: vec![],
            first_seen: ts(1),
            last_seen: ts(appearances),
            appearance_count: appearances,
            status_history: (1..=appearances)
                .map(|h| StatusEntry {
                    seen_at: ts(h),
                    status: if h == appearances { status } else { PostingStatus::Open },
                })
                .collect(),
        }
    }

    fn map(jobs: Vec<TrackedJob>) -> BTreeMap<i64, TrackedJob> {
        jobs.into_iter().map(|j| (j.post_id, j)).collect()
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&BTreeMap::new(), 10);
        assert_eq!(summary.total_unique, 0);
        assert!(summary.first_seen.is_none());
        assert!(summary.top_units.is_empty());
    }

    #[test]
    fn test_summarize_counts() {
        let jobs = map(vec![
            job(1, "Alpha", 1, PostingStatus::Open),
            job(2, "Alpha", 3, PostingStatus::Closed),
            job(3, "Bravo", 2, PostingStatus::Open),
        ]);
        let summary = summarize(&jobs, 10);

        assert_eq!(summary.total_unique, 3);
        assert_eq!(summary.open_count, 2);
        assert_eq!(summary.closed_count, 1);
        assert_eq!(summary.one_time_count, 1);
        assert_eq!(summary.one_time_post_ids, vec![1]);
        assert_eq!(summary.first_seen, Some(ts(1)));
        assert_eq!(summary.last_seen, Some(ts(3)));
        assert_eq!(summary.appearance_histogram[&1], 1);
        assert_eq!(summary.appearance_histogram[&2], 1);
        assert_eq!(summary.appearance_histogram[&3], 1);
    }

    #[test]
    fn test_top_units_ordering_and_bound() {
        let jobs = map(vec![
            job(1, "Bravo", 1, PostingStatus::Open),
            job(2, "Bravo", 1, PostingStatus::Open),
            job(3, "Alpha", 1, PostingStatus::Open),
            job(4, "Charlie", 1, PostingStatus::Open),
        ]);
        let summary = summarize(&jobs, 2);

        assert_eq!(summary.top_units.len(), 2);
        assert_eq!(summary.top_units[0].unit_name, "Bravo");
        assert_eq!(summary.top_units[0].count, 2);
        // Alphabetical tie-break among count-1 units.
        assert_eq!(summary.top_units[1].unit_name, "Alpha");
    }

    #[test]
    fn test_unnamed_units_excluded_from_leaderboard() {
        let jobs = map(vec![job(1, "", 1, PostingStatus::Open)]);
        let summary = summarize(&jobs, 10);
        assert!(summary.top_units.is_empty());
        assert_eq!(summary.total_unique, 1);
    }

    #[test]
    fn test_one_time_postings() {
        let jobs = map(vec![
            job(1, "Alpha", 1, PostingStatus::Open),
            job(2, "Alpha", 5, PostingStatus::Open),
            job(3, "Bravo", 1, PostingStatus::Closed),
        ]);
        let once = one_time_postings(&jobs);
        let ids: Vec<i64> = once.iter().map(|j| j.post_id).collect();
        assert_eq!(ids, vec![1, 3]);

        // The served summary carries the same identifiers.
        assert_eq!(summarize(&jobs, 10).one_time_post_ids, vec![1, 3]);
    }
}
