use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::models::{BacklogJob, DetailPageRow, NewDetailPage, SnapshotRow, TrackedJobRow};
use crate::parser::{Posting, PostingStatus, Snapshot};
use crate::tracker::{StatusEntry, TrackedJob};

// ========== Timestamp helpers ==========

fn ts_to_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn ts_from_str(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp: {s}"))
}

fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn tags_from_json(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

// ========== Snapshots ==========

/// Get a snapshot by its source file.
pub async fn get_snapshot_by_source_file(
    pool: &SqlitePool,
    source_file: &str,
) -> Result<Option<SnapshotRow>> {
    sqlx::query_as("SELECT * FROM snapshots WHERE source_file = ?")
        .bind(source_file)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch snapshot by source file")
}

/// Get a snapshot by its raw-content hash.
pub async fn get_snapshot_by_content_hash(
    pool: &SqlitePool,
    content_hash: &str,
) -> Result<Option<SnapshotRow>> {
    sqlx::query_as("SELECT * FROM snapshots WHERE content_hash = ?")
        .bind(content_hash)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch snapshot by content hash")
}

/// Get all snapshots ordered by capture time ascending.
pub async fn get_all_snapshots(pool: &SqlitePool) -> Result<Vec<SnapshotRow>> {
    sqlx::query_as("SELECT * FROM snapshots ORDER BY captured_at ASC, id ASC")
        .fetch_all(pool)
        .await
        .context("Failed to fetch snapshots")
}

/// Count registered snapshots.
pub async fn count_snapshots(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots")
        .fetch_one(pool)
        .await
        .context("Failed to count snapshots")?;
    Ok(count)
}

/// Load the ordered posting sequence of a registered snapshot.
pub async fn get_postings_for_snapshot(
    pool: &SqlitePool,
    snapshot_id: i64,
) -> Result<Vec<Posting>> {
    let rows: Vec<super::models::PostingRow> =
        sqlx::query_as("SELECT * FROM postings WHERE snapshot_id = ? ORDER BY ord ASC")
            .bind(snapshot_id)
            .fetch_all(pool)
            .await
            .context("Failed to fetch postings for snapshot")?;

    rows.into_iter()
        .map(|row| {
            Ok(Posting {
                post_id: row.post_id,
                url: row.url,
                unit_name: row.unit_name,
                position: row.position,
                image_url: row.image_url,
                categories: tags_from_json(&row.categories),
                units: tags_from_json(&row.units),
                status: PostingStatus::from_str(&row.status)
                    .with_context(|| format!("Invalid stored posting status: {}", row.status))?,
            })
        })
        .collect()
}

/// Reconstruct a full [`Snapshot`] from a registered row.
pub async fn load_snapshot(pool: &SqlitePool, row: &SnapshotRow) -> Result<Snapshot> {
    let posts = get_postings_for_snapshot(pool, row.id).await?;
    Ok(Snapshot {
        source_file: row.source_file.clone(),
        parsed_at: ts_from_str(&row.captured_at)?,
        post_count: posts.len(),
        posts,
    })
}

/// Register a parsed snapshot and fold it into the tracked-job set.
///
/// The snapshot row, its postings, and all tracked-job updates are applied
/// in one transaction, so a crashed run leaves no partial state.
///
/// # Errors
///
/// Fails on data-integrity violations: a source file registered twice,
/// duplicate raw content under a different source file, or a capture
/// timestamp older than already-registered snapshots or a job's last
/// observation.
pub async fn register_snapshot(
    pool: &SqlitePool,
    snapshot: &Snapshot,
    content_hash: &str,
) -> Result<i64> {
    if let Some(existing) = get_snapshot_by_source_file(pool, &snapshot.source_file).await? {
        bail!(
            "snapshot {} is already registered (id {})",
            snapshot.source_file,
            existing.id
        );
    }
    if let Some(existing) = get_snapshot_by_content_hash(pool, content_hash).await? {
        bail!(
            "snapshot {} duplicates the content of {}",
            snapshot.source_file,
            existing.source_file
        );
    }

    let captured_at = ts_to_str(snapshot.parsed_at);

    let (latest,): (Option<String>,) = sqlx::query_as("SELECT MAX(captured_at) FROM snapshots")
        .fetch_one(pool)
        .await
        .context("Failed to fetch latest snapshot timestamp")?;
    if let Some(last) = latest {
        if captured_at < last {
            bail!(
                "out-of-order snapshot: {} at {} is older than the last registered snapshot at {}",
                snapshot.source_file,
                captured_at,
                last
            );
        }
    }

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(
        r"
        INSERT INTO snapshots (source_file, captured_at, content_hash, post_count)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(&snapshot.source_file)
    .bind(&captured_at)
    .bind(content_hash)
    .bind(snapshot.post_count as i64)
    .execute(&mut *tx)
    .await
    .context("Failed to insert snapshot")?;
    let snapshot_id = result.last_insert_rowid();

    for (ord, posting) in snapshot.posts.iter().enumerate() {
        sqlx::query(
            r"
            INSERT INTO postings
                (snapshot_id, ord, post_id, url, unit_name, position, image_url, categories, units, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(snapshot_id)
        .bind(ord as i64)
        .bind(posting.post_id)
        .bind(&posting.url)
        .bind(&posting.unit_name)
        .bind(&posting.position)
        .bind(&posting.image_url)
        .bind(tags_to_json(&posting.categories))
        .bind(tags_to_json(&posting.units))
        .bind(posting.status.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to insert posting")?;

        apply_posting(&mut tx, posting, &captured_at).await?;
    }

    tx.commit().await.context("Failed to commit snapshot")?;
    Ok(snapshot_id)
}

/// Fold one posting observation into the tracked-job tables.
async fn apply_posting(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    posting: &Posting,
    captured_at: &str,
) -> Result<()> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT last_seen FROM tracked_jobs WHERE post_id = ?")
            .bind(posting.post_id)
            .fetch_optional(&mut **tx)
            .await
            .context("Failed to fetch tracked job")?;

    if let Some((last_seen,)) = existing {
        if captured_at < last_seen.as_str() {
            bail!(
                "out-of-order observation for posting {}: {} is older than last seen {}",
                posting.post_id,
                captured_at,
                last_seen
            );
        }

        // Descriptive fields: latest snapshot wins.
        sqlx::query(
            r"
            UPDATE tracked_jobs
            SET position = ?, unit_name = ?, url = ?, image_url = ?,
                categories = ?, units = ?, last_seen = ?,
                appearance_count = appearance_count + 1
            WHERE post_id = ?
            ",
        )
        .bind(&posting.position)
        .bind(&posting.unit_name)
        .bind(&posting.url)
        .bind(&posting.image_url)
        .bind(tags_to_json(&posting.categories))
        .bind(tags_to_json(&posting.units))
        .bind(captured_at)
        .bind(posting.post_id)
        .execute(&mut **tx)
        .await
        .context("Failed to update tracked job")?;
    } else {
        sqlx::query(
            r"
            INSERT INTO tracked_jobs
                (post_id, position, unit_name, url, image_url, categories, units,
                 first_seen, last_seen, appearance_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            ",
        )
        .bind(posting.post_id)
        .bind(&posting.position)
        .bind(&posting.unit_name)
        .bind(&posting.url)
        .bind(&posting.image_url)
        .bind(tags_to_json(&posting.categories))
        .bind(tags_to_json(&posting.units))
        .bind(captured_at)
        .bind(captured_at)
        .execute(&mut **tx)
        .await
        .context("Failed to insert tracked job")?;
    }

    sqlx::query("INSERT INTO status_history (post_id, seen_at, status) VALUES (?, ?, ?)")
        .bind(posting.post_id)
        .bind(captured_at)
        .bind(posting.status.as_str())
        .execute(&mut **tx)
        .await
        .context("Failed to insert status history entry")?;

    Ok(())
}

// ========== Tracked jobs ==========

fn tracked_job_from_row(row: TrackedJobRow, history: Vec<StatusEntry>) -> Result<TrackedJob> {
    Ok(TrackedJob {
        post_id: row.post_id,
        position: row.position,
        unit_name: row.unit_name,
        url: row.url,
        image_url: row.image_url,
        categories: tags_from_json(&row.categories),
        units: tags_from_json(&row.units),
        first_seen: ts_from_str(&row.first_seen)?,
        last_seen: ts_from_str(&row.last_seen)?,
        appearance_count: u32::try_from(row.appearance_count)
            .context("Negative appearance count")?,
        status_history: history,
    })
}

/// Load one tracked job with its full status history.
pub async fn get_tracked_job(pool: &SqlitePool, post_id: i64) -> Result<Option<TrackedJob>> {
    let row: Option<TrackedJobRow> = sqlx::query_as("SELECT * FROM tracked_jobs WHERE post_id = ?")
        .bind(post_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch tracked job")?;

    let Some(row) = row else { return Ok(None) };
    let history = get_status_history(pool, post_id).await?;
    Ok(Some(tracked_job_from_row(row, history)?))
}

/// Load the status history of one job, ascending by observation time.
pub async fn get_status_history(pool: &SqlitePool, post_id: i64) -> Result<Vec<StatusEntry>> {
    let rows: Vec<super::models::StatusHistoryRow> =
        sqlx::query_as("SELECT * FROM status_history WHERE post_id = ? ORDER BY seen_at ASC, id ASC")
            .bind(post_id)
            .fetch_all(pool)
            .await
            .context("Failed to fetch status history")?;

    rows.into_iter()
        .map(|row| {
            Ok(StatusEntry {
                seen_at: ts_from_str(&row.seen_at)?,
                status: PostingStatus::from_str(&row.status)
                    .with_context(|| format!("Invalid stored status: {}", row.status))?,
            })
        })
        .collect()
}

/// Load the full tracked-job map, keyed by posting identifier.
pub async fn get_all_tracked_jobs(pool: &SqlitePool) -> Result<BTreeMap<i64, TrackedJob>> {
    let rows: Vec<TrackedJobRow> = sqlx::query_as("SELECT * FROM tracked_jobs ORDER BY post_id ASC")
        .fetch_all(pool)
        .await
        .context("Failed to fetch tracked jobs")?;

    let history_rows: Vec<super::models::StatusHistoryRow> =
        sqlx::query_as("SELECT * FROM status_history ORDER BY post_id ASC, seen_at ASC, id ASC")
            .fetch_all(pool)
            .await
            .context("Failed to fetch status history")?;

    let mut histories: BTreeMap<i64, Vec<StatusEntry>> = BTreeMap::new();
    for row in history_rows {
        histories.entry(row.post_id).or_default().push(StatusEntry {
            seen_at: ts_from_str(&row.seen_at)?,
            status: PostingStatus::from_str(&row.status)
                .with_context(|| format!("Invalid stored status: {}", row.status))?,
        });
    }

    let mut jobs = BTreeMap::new();
    for row in rows {
        let post_id = row.post_id;
        let history = histories.remove(&post_id).unwrap_or_default();
        jobs.insert(post_id, tracked_job_from_row(row, history)?);
    }
    Ok(jobs)
}

/// Count tracked jobs.
pub async fn count_tracked_jobs(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tracked_jobs")
        .fetch_one(pool)
        .await
        .context("Failed to count tracked jobs")?;
    Ok(count)
}

// ========== Detail pages (enrichment) ==========

/// Tracked jobs with no detail-page record yet, ascending by posting id.
///
/// The stable order means repeated runs make monotonic progress through a
/// backlog larger than the cap.
pub async fn get_unenriched_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<BacklogJob>> {
    sqlx::query_as(
        r"
        SELECT t.post_id, t.url, t.position, t.unit_name
        FROM tracked_jobs t
        LEFT JOIN detail_pages d ON t.post_id = d.post_id
        WHERE d.post_id IS NULL AND t.url != ''
        ORDER BY t.post_id ASC
        LIMIT ?
        ",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch enrichment backlog")
}

/// Count tracked jobs awaiting enrichment.
pub async fn count_unenriched_jobs(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r"
        SELECT COUNT(*)
        FROM tracked_jobs t
        LEFT JOIN detail_pages d ON t.post_id = d.post_id
        WHERE d.post_id IS NULL AND t.url != ''
        ",
    )
    .fetch_one(pool)
    .await
    .context("Failed to count enrichment backlog")?;
    Ok(count)
}

/// Insert an enrichment record, marking the posting as enriched.
pub async fn insert_detail_page(pool: &SqlitePool, page: &NewDetailPage) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO detail_pages
            (post_id, url, html_path, status, title, unit, unit_url,
             modified_date, requirements, content, downloaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(page.post_id)
    .bind(&page.url)
    .bind(&page.html_path)
    .bind(&page.status)
    .bind(&page.title)
    .bind(&page.unit)
    .bind(&page.unit_url)
    .bind(&page.modified_date)
    .bind(&page.requirements)
    .bind(&page.content)
    .bind(&page.downloaded_at)
    .execute(pool)
    .await
    .context("Failed to insert detail page")?;
    Ok(())
}

/// Get the enrichment record for a posting, if any.
pub async fn get_detail_page(pool: &SqlitePool, post_id: i64) -> Result<Option<DetailPageRow>> {
    sqlx::query_as("SELECT * FROM detail_pages WHERE post_id = ?")
        .bind(post_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch detail page")
}

/// Count enriched postings.
pub async fn count_detail_pages(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM detail_pages")
        .fetch_one(pool)
        .await
        .context("Failed to count detail pages")?;
    Ok(count)
}
