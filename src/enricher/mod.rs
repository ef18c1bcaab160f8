//! Detail-page downloader (enrichment).
//!
//! For tracked postings that have not been enriched yet, fetches the
//! individual detail page at most once, persists the raw markup under an
//! identifier-sharded directory, and derives richer metadata including a
//! content-level closed marker.
//!
//! Failed identifiers are never marked enriched; they stay in the backlog
//! and are retried on every subsequent invocation. There is deliberately no
//! give-up threshold.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constants::{BROWSER_USER_AGENT, DETAIL_CLOSED_MARKER, MAX_DETAIL_CONTENT_CHARS};
use crate::db::{self, BacklogJob, Database, NewDetailPage};
use crate::fs_utils;
use crate::parser::PostingStatus;

/// One labeled field from the detail page's info section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub label: String,
    pub value: String,
}

/// Metadata derived from one downloaded detail page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailMetadata {
    pub post_id: i64,
    pub url: String,
    pub position: String,
    pub unit_name: String,
    pub status: PostingStatus,
    pub is_closed: bool,
    pub title: Option<String>,
    pub unit: Option<String>,
    pub unit_url: Option<String>,
    pub modified_date: Option<String>,
    pub requirements: Vec<Requirement>,
    pub content: String,
    pub downloaded_at: String,
}

/// Counters for one enrichment invocation, appended to the run-statistics
/// log whether or not any downloads happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub new_jobs_found: u64,
    pub jobs_downloaded: u64,
    pub download_successful: u64,
    pub download_failed: u64,
    pub metadata_generated: u64,
    pub metadata_skipped: u64,
    pub metadata_failed: u64,
}

#[derive(Debug, Serialize)]
struct EnrichRunRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    summary: &'a EnrichmentSummary,
}

/// Detail-page enrichment service.
pub struct Enricher {
    config: Config,
    db: Database,
    client: reqwest::Client,
}

impl Enricher {
    /// Create a new enricher with its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.enrich_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { config, db, client })
    }

    /// Run the enrichment loop forever.
    pub async fn run_loop(&self) {
        loop {
            match self.run_once().await {
                Ok(summary) => {
                    if summary.new_jobs_found > 0 {
                        info!(
                            found = summary.new_jobs_found,
                            downloaded = summary.download_successful,
                            failed = summary.download_failed,
                            "Enrichment pass complete"
                        );
                    } else {
                        debug!("No postings awaiting enrichment");
                    }
                }
                Err(e) => {
                    error!("Enrichment pass error: {e:#}");
                }
            }

            tokio::time::sleep(self.config.enrich_interval).await;
        }
    }

    /// Run one enrichment pass: download up to the batch cap of un-enriched
    /// detail pages in ascending identifier order, then backfill metadata
    /// files for any pages on disk that lack one.
    ///
    /// Appends one record to the run-statistics log regardless of outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog cannot be queried or the statistics
    /// record cannot be written. Per-identifier failures are counted, not
    /// propagated.
    pub async fn run_once(&self) -> Result<EnrichmentSummary> {
        let mut summary = EnrichmentSummary::default();

        summary.new_jobs_found =
            u64::try_from(db::count_unenriched_jobs(self.db.pool()).await?).unwrap_or(0);

        let batch = db::get_unenriched_jobs(
            self.db.pool(),
            i64::try_from(self.config.enrich_batch_cap).unwrap_or(i64::MAX),
        )
        .await?;

        if summary.new_jobs_found > batch.len() as u64 {
            info!(
                found = summary.new_jobs_found,
                cap = batch.len(),
                "Enrichment backlog exceeds batch cap; remainder deferred to later runs"
            );
        }

        for (idx, job) in batch.iter().enumerate() {
            debug!(
                post_id = job.post_id,
                progress = format!("{}/{}", idx + 1, batch.len()),
                position = %job.position,
                "Downloading detail page"
            );
            summary.jobs_downloaded += 1;

            match self.enrich_one(job).await {
                Ok(metadata) => {
                    summary.download_successful += 1;
                    summary.metadata_generated += 1;
                    if metadata.is_closed {
                        debug!(post_id = job.post_id, "Detail page reports vacancy closed");
                    }
                }
                Err(e) => {
                    // Stays in the backlog; retried next invocation.
                    summary.download_failed += 1;
                    warn!(post_id = job.post_id, url = %job.url, "Detail download failed: {e:#}");
                }
            }
        }

        self.backfill_metadata(&mut summary).await?;

        let record = EnrichRunRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            summary: &summary,
        };
        fs_utils::append_jsonl(&self.config.stats_log_path(), &record)
            .await
            .context("Failed to append enrichment statistics record")?;

        Ok(summary)
    }

    /// Download one detail page, persist it, derive metadata, and mark the
    /// posting enriched.
    async fn enrich_one(&self, job: &BacklogJob) -> Result<DetailMetadata> {
        let response = self
            .client
            .get(&job.url)
            .send()
            .await
            .context("Request failed")?
            .error_for_status()
            .context("Non-success status")?;
        let html = response.text().await.context("Failed to read body")?;

        let html_path = job_page_path(&self.config.job_pages_dir(), job.post_id);
        fs_utils::write_atomic(&html_path, html.as_bytes())
            .await
            .context("Failed to persist detail page")?;

        let metadata = derive_metadata(job.post_id, &job.url, &job.position, &job.unit_name, &html);
        let json_path = html_path.with_extension("json");
        fs_utils::write_json_atomic(&json_path, &metadata)
            .await
            .context("Failed to write detail metadata")?;

        // The database row is the "already enriched" mark; it lands only
        // after both files are on disk.
        let new_page = NewDetailPage {
            post_id: job.post_id,
            url: job.url.clone(),
            html_path: html_path.to_string_lossy().into_owned(),
            status: metadata.status.as_str().to_string(),
            title: metadata.title.clone(),
            unit: metadata.unit.clone(),
            unit_url: metadata.unit_url.clone(),
            modified_date: metadata.modified_date.clone(),
            requirements: serde_json::to_string(&metadata.requirements)
                .unwrap_or_else(|_| "[]".to_string()),
            content: metadata.content.clone(),
            downloaded_at: metadata.downloaded_at.clone(),
        };
        db::insert_detail_page(self.db.pool(), &new_page).await?;

        Ok(metadata)
    }

    /// Generate metadata files for detail pages on disk that lack one.
    ///
    /// Covers pages downloaded before the metadata format existed (or whose
    /// metadata write was interrupted).
    async fn backfill_metadata(&self, summary: &mut EnrichmentSummary) -> Result<()> {
        let pages =
            fs_utils::collect_files(&self.config.job_pages_dir(), "job_", ".html").await?;

        for html_path in pages {
            let json_path = html_path.with_extension("json");
            if tokio::fs::try_exists(&json_path).await.unwrap_or(false) {
                summary.metadata_skipped += 1;
                continue;
            }

            let Some(post_id) = post_id_from_page_path(&html_path) else {
                warn!(path = %html_path.display(), "Detail page filename carries no posting id");
                summary.metadata_failed += 1;
                continue;
            };

            match self.regenerate_one(post_id, &html_path, &json_path).await {
                Ok(()) => summary.metadata_generated += 1,
                Err(e) => {
                    warn!(post_id, "Metadata backfill failed: {e:#}");
                    summary.metadata_failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn regenerate_one(
        &self,
        post_id: i64,
        html_path: &Path,
        json_path: &Path,
    ) -> Result<()> {
        let html = tokio::fs::read_to_string(html_path)
            .await
            .with_context(|| format!("Failed to read detail page: {}", html_path.display()))?;

        // Listing-derived fields are unknown when backfilling from disk.
        let stored = db::get_detail_page(self.db.pool(), post_id).await?;
        let url = stored.map(|p| p.url).unwrap_or_default();
        let metadata = derive_metadata(post_id, &url, "", "", &html);
        fs_utils::write_json_atomic(json_path, &metadata).await
    }
}

/// Canonical sharded path for a detail page: the identifier is zero-padded
/// to six digits and split `<id[0..3]>/<id[3..6]>/job_<id>.html` to bound
/// directory sizes.
#[must_use]
pub fn job_page_path(job_pages_dir: &Path, post_id: i64) -> PathBuf {
    let id_str = format!("{post_id:06}");
    job_pages_dir
        .join(&id_str[..3])
        .join(&id_str[3..6])
        .join(format!("job_{post_id}.html"))
}

fn post_id_from_page_path(path: &Path) -> Option<i64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("job_")?
        .parse()
        .ok()
}

/// Derive metadata from detail-page markup.
#[must_use]
pub fn derive_metadata(
    post_id: i64,
    url: &str,
    position: &str,
    unit_name: &str,
    html: &str,
) -> DetailMetadata {
    let is_closed = html.contains(DETAIL_CLOSED_MARKER);
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("h1.vacancy-name").expect("Invalid selector");
    let unit_selector = Selector::parse(r#"a[href*="/brigades/"]"#).expect("Invalid selector");
    let modified_selector =
        Selector::parse(r#"meta[property="article:modified_time"]"#).expect("Invalid selector");

    let title = document
        .select(&title_selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let (unit, unit_url) = document.select(&unit_selector).next().map_or((None, None), |a| {
        let text = a.text().collect::<String>().trim().to_string();
        let href = a.value().attr("href").map(ToString::to_string);
        ((!text.is_empty()).then_some(text), href)
    });

    let modified_date = document
        .select(&modified_selector)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(ToString::to_string);

    DetailMetadata {
        post_id,
        url: url.to_string(),
        position: position.to_string(),
        unit_name: unit_name.to_string(),
        status: if is_closed {
            PostingStatus::Closed
        } else {
            PostingStatus::Open
        },
        is_closed,
        title,
        unit,
        unit_url,
        modified_date,
        requirements: extract_requirements(&document),
        content: extract_main_content(&document),
        downloaded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

/// Labeled fields from the vacancy info section, in page order.
fn extract_requirements(document: &Html) -> Vec<Requirement> {
    let item_selector = Selector::parse("div.vacancy-info-item").expect("Invalid selector");
    let label_selector = Selector::parse("div.item-label").expect("Invalid selector");
    let value_selector = Selector::parse("div.item-value").expect("Invalid selector");

    let mut requirements = Vec::new();
    for item in document.select(&item_selector) {
        let label = item
            .select(&label_selector)
            .next()
            .map(|e| e.text().collect::<String>());
        let value = item
            .select(&value_selector)
            .next()
            .map(|e| e.text().collect::<String>());

        if let (Some(label), Some(value)) = (label, value) {
            let label = label.trim().trim_end_matches(':').to_string();
            let value = normalize_whitespace(&value);
            if !label.is_empty() && !value.is_empty() {
                requirements.push(Requirement { label, value });
            }
        }
    }
    requirements
}

/// Text of the main content region: `main`, then `article`, then `body`.
fn extract_main_content(document: &Html) -> String {
    for selector_str in ["main", "article", "body"] {
        let selector = Selector::parse(selector_str).expect("Invalid selector");
        if let Some(region) = document.select(&selector).next() {
            let text = normalize_whitespace(&region.text().collect::<String>());
            if !text.is_empty() {
                return truncate_chars(&text, MAX_DETAIL_CONTENT_CHARS);
            }
        }
    }
    String::new()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN_PAGE: &str = r#"
        <html><head>
            <meta property="article:modified_time" content="2025-11-02T09:30:00+02:00">
        </head><body>
            <main>
                <h1 class="vacancy-name">Drone Operator</h1>
                <a href="/brigades/93/">93rd Brigade</a>
                <div class="vacancy-info-section">
                    <div class="vacancy-info-item">
                        <div class="item-label">Experience:</div>
                        <div class="item-value">Not required</div>
                    </div>
                    <div class="vacancy-info-item">
                        <div class="item-label">Location</div>
                        <div class="item-value">Eastern  front</div>
                    </div>
                </div>
                <p>Operate reconnaissance drones.</p>
            </main>
        </body></html>"#;

    #[test]
    fn test_derive_metadata_open_page() {
        let meta = derive_metadata(123, "https://jobs.example/v/123", "Operator", "93rd", OPEN_PAGE);

        assert!(!meta.is_closed);
        assert_eq!(meta.status, PostingStatus::Open);
        assert_eq!(meta.title.as_deref(), Some("Drone Operator"));
        assert_eq!(meta.unit.as_deref(), Some("93rd Brigade"));
        assert_eq!(meta.unit_url.as_deref(), Some("/brigades/93/"));
        assert_eq!(meta.modified_date.as_deref(), Some("2025-11-02T09:30:00+02:00"));
        assert_eq!(
            meta.requirements,
            vec![
                Requirement { label: "Experience".into(), value: "Not required".into() },
                Requirement { label: "Location".into(), value: "Eastern front".into() },
            ]
        );
        assert!(meta.content.contains("Operate reconnaissance drones."));
    }

    #[test]
    fn test_derive_metadata_closed_marker() {
        let html = format!("<html><body><main>{DETAIL_CLOSED_MARKER}</main></body></html>");
        let meta = derive_metadata(1, "", "", "", &html);
        assert!(meta.is_closed);
        assert_eq!(meta.status, PostingStatus::Closed);
    }

    #[test]
    fn test_derive_metadata_bare_page() {
        let meta = derive_metadata(1, "", "", "", "<html><body>plain</body></html>");
        assert!(!meta.is_closed);
        assert!(meta.title.is_none());
        assert!(meta.requirements.is_empty());
        assert_eq!(meta.content, "plain");
    }

    #[test]
    fn test_job_page_path_sharding() {
        let root = Path::new("/data/job-pages");
        assert_eq!(
            job_page_path(root, 12345),
            PathBuf::from("/data/job-pages/012/345/job_12345.html")
        );
        assert_eq!(
            job_page_path(root, 1234567),
            PathBuf::from("/data/job-pages/123/456/job_1234567.html")
        );
    }

    #[test]
    fn test_post_id_from_page_path() {
        assert_eq!(
            post_id_from_page_path(Path::new("/x/012/345/job_12345.html")),
            Some(12345)
        );
        assert_eq!(post_id_from_page_path(Path::new("/x/readme.html")), None);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        // Multi-byte characters must not be split.
        let text = "вакансія".repeat(10);
        let truncated = truncate_chars(&text, 10);
        assert_eq!(truncated.chars().count(), 10);
    }
}
