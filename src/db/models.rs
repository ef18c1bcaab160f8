use serde::{Deserialize, Serialize};

/// One registered fetch-and-parse cycle.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    /// Path of the raw artifact relative to the data directory. Unique:
    /// each capture is registered at most once.
    pub source_file: String,
    pub captured_at: String,
    /// SHA-256 of the raw artifact. Unique: two snapshots with identical
    /// content under different names are a data-integrity violation.
    pub content_hash: String,
    pub post_count: i64,
    pub registered_at: String,
}

/// One posting as captured in one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostingRow {
    pub id: i64,
    pub snapshot_id: i64,
    /// Position within the snapshot's ordered posting sequence.
    pub ord: i64,
    pub post_id: i64,
    pub url: String,
    pub unit_name: String,
    pub position: String,
    pub image_url: String,
    /// JSON array of `category-*` classes.
    pub categories: String,
    /// JSON array of `units-*` classes.
    pub units: String,
    pub status: String,
}

/// Canonical longitudinal record for one posting identifier.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackedJobRow {
    pub post_id: i64,
    pub position: String,
    pub unit_name: String,
    pub url: String,
    pub image_url: String,
    pub categories: String,
    pub units: String,
    pub first_seen: String,
    pub last_seen: String,
    pub appearance_count: i64,
}

/// One status observation for one tracked job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusHistoryRow {
    pub id: i64,
    pub post_id: i64,
    pub seen_at: String,
    pub status: String,
}

/// Enrichment record for one downloaded detail page.
///
/// Existence of a row is the "already enriched" mark: the downloader
/// inserts it only after a successful fetch, so failed identifiers stay
/// in the backlog.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DetailPageRow {
    pub post_id: i64,
    pub url: String,
    pub html_path: String,
    pub status: String,
    pub title: Option<String>,
    pub unit: Option<String>,
    pub unit_url: Option<String>,
    pub modified_date: Option<String>,
    /// JSON array of `{label, value}` requirement fields, in page order.
    pub requirements: String,
    pub content: String,
    pub downloaded_at: String,
}

/// Data for inserting a new detail-page record.
#[derive(Debug, Clone)]
pub struct NewDetailPage {
    pub post_id: i64,
    pub url: String,
    pub html_path: String,
    pub status: String,
    pub title: Option<String>,
    pub unit: Option<String>,
    pub unit_url: Option<String>,
    pub modified_date: Option<String>,
    pub requirements: String,
    pub content: String,
    pub downloaded_at: String,
}

/// A posting awaiting detail-page enrichment.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BacklogJob {
    pub post_id: i64,
    pub url: String,
    pub position: String,
    pub unit_name: String,
}
