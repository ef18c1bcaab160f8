//! Listing-page HTML parser.
//!
//! Converts one raw listing artifact into an ordered sequence of postings.
//! Each posting fragment is extracted independently: a fragment that fails
//! extraction is skipped and logged without affecting its siblings.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{ARTIFACT_TIMESTAMP_FORMAT, RAW_ARTIFACT_PREFIX};
use crate::fs_utils;

/// Status of a posting as captured in a single snapshot.
///
/// The listing page carries an explicit closed marker; absence of the marker
/// means open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    Open,
    Closed,
}

impl PostingStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One vacancy posting as seen in a single listing snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub post_id: i64,
    pub url: String,
    pub unit_name: String,
    pub position: String,
    pub image_url: String,
    pub categories: Vec<String>,
    pub units: Vec<String>,
    pub status: PostingStatus,
}

/// The full set of postings extracted from one fetch-and-parse cycle.
///
/// `parsed_at` is the capture timestamp carried from the artifact filename,
/// not the wall clock, so parsing the same artifact twice produces
/// byte-identical output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_file: String,
    pub parsed_at: DateTime<Utc>,
    pub post_count: usize,
    pub posts: Vec<Posting>,
}

/// Extract all postings from rendered listing-page HTML.
///
/// Posting containers are `div` elements whose `id` matches `post-<digits>`.
#[must_use]
pub fn parse_listing(html: &str) -> Vec<Posting> {
    let document = Html::parse_document(html);
    let container_selector = Selector::parse(r#"div[id^="post-"]"#).expect("Invalid selector");
    let id_pattern = Regex::new(r"^post-(\d+)$").expect("Invalid regex");

    let mut posts = Vec::new();

    for element in document.select(&container_selector) {
        let raw_id = element.value().attr("id").unwrap_or_default();
        let Some(post_id) = id_pattern
            .captures(raw_id)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
        else {
            // Required field; skip this fragment only.
            warn!(id = %raw_id, "Skipping posting fragment without a numeric post id");
            continue;
        };

        posts.push(extract_posting(post_id, &element));
    }

    posts
}

/// Extract the fields of one posting fragment.
fn extract_posting(post_id: i64, element: &ElementRef) -> Posting {
    let link_selector = Selector::parse("a.job-item").expect("Invalid selector");
    let unit_selector = Selector::parse("h4.square-content__title").expect("Invalid selector");
    let position_selector = Selector::parse("h4.vacancy_content").expect("Invalid selector");
    let image_selector = Selector::parse("img.wp-post-image").expect("Invalid selector");

    let url = element
        .select(&link_selector)
        .next()
        .and_then(|a| a.value().attr("href"))
        .unwrap_or_default()
        .to_string();

    let unit_name = element
        .select(&unit_selector)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let position = element
        .select(&position_selector)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let image_url = element
        .select(&image_selector)
        .next()
        .and_then(|img| img.value().attr("src"))
        .unwrap_or_default()
        .to_string();

    let classes: Vec<&str> = element.value().classes().collect();
    let categories = classes_with_prefix(&classes, "category-");
    let units = classes_with_prefix(&classes, "units-");

    // Listing fragments carry a `tors-status-*` class; only an explicit
    // `is-closed` marker means closed.
    let status = if classes
        .iter()
        .any(|c| c.contains("tors-status-") && c.contains("is-closed"))
    {
        PostingStatus::Closed
    } else {
        PostingStatus::Open
    };

    Posting {
        post_id,
        url,
        unit_name,
        position,
        image_url,
        categories,
        units,
        status,
    }
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn classes_with_prefix(classes: &[&str], prefix: &str) -> Vec<String> {
    classes
        .iter()
        .filter(|c| c.starts_with(prefix))
        .map(ToString::to_string)
        .collect()
}

/// Derive the capture timestamp from a raw artifact filename
/// (`output_YYYYMMDD_HHMMSS.html`).
///
/// # Errors
///
/// Returns an error if the filename does not carry a parseable timestamp.
pub fn captured_at_from_path(path: &Path) -> Result<DateTime<Utc>> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Artifact path has no filename: {}", path.display()))?;
    let ts = stem.strip_prefix(RAW_ARTIFACT_PREFIX).with_context(|| {
        format!("Artifact filename missing '{RAW_ARTIFACT_PREFIX}' prefix: {stem}")
    })?;
    let naive = NaiveDateTime::parse_from_str(ts, ARTIFACT_TIMESTAMP_FORMAT)
        .with_context(|| format!("Artifact filename has no valid timestamp: {stem}"))?;
    Ok(naive.and_utc())
}

/// Parse a raw artifact into a [`Snapshot`].
///
/// `source_file` records the artifact path relative to `data_dir` so the
/// snapshot mirrors the raw artifact's date-partitioned location.
///
/// # Errors
///
/// Returns an error if the artifact cannot be read or its filename carries
/// no timestamp. Individual fragment failures are logged and skipped.
pub async fn parse_artifact(artifact: &Path, data_dir: &Path) -> Result<Snapshot> {
    let html = tokio::fs::read_to_string(artifact)
        .await
        .with_context(|| format!("Failed to read artifact: {}", artifact.display()))?;

    let parsed_at = captured_at_from_path(artifact)?;
    let source_file = artifact
        .strip_prefix(data_dir)
        .unwrap_or(artifact)
        .to_string_lossy()
        .replace('\\', "/");

    let posts = parse_listing(&html);
    debug!(
        source_file = %source_file,
        post_count = posts.len(),
        "Parsed listing artifact"
    );

    Ok(Snapshot {
        source_file,
        parsed_at,
        post_count: posts.len(),
        posts,
    })
}

/// Path of the JSON mirror for a raw artifact (same directory, `.json` suffix).
#[must_use]
pub fn snapshot_path_for(artifact: &Path) -> std::path::PathBuf {
    artifact.with_extension("json")
}

/// Write the snapshot JSON next to its raw artifact, atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn write_snapshot(snapshot: &Snapshot, artifact: &Path) -> Result<std::path::PathBuf> {
    let path = snapshot_path_for(artifact);
    fs_utils::write_json_atomic(&path, snapshot).await?;
    Ok(path)
}
