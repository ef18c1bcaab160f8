use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Snapshots table: one row per registered fetch-and-parse cycle
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_file TEXT NOT NULL UNIQUE,
            captured_at TEXT NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            post_count INTEGER NOT NULL,
            registered_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create snapshots table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_captured_at ON snapshots(captured_at)")
        .execute(pool)
        .await?;

    // Postings table: the ordered posting sequence of each snapshot
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS postings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
            ord INTEGER NOT NULL,
            post_id INTEGER NOT NULL,
            url TEXT NOT NULL,
            unit_name TEXT NOT NULL,
            position TEXT NOT NULL,
            image_url TEXT NOT NULL,
            categories TEXT NOT NULL,
            units TEXT NOT NULL,
            status TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create postings table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_postings_snapshot ON postings(snapshot_id, ord)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_postings_post_id ON postings(post_id)")
        .execute(pool)
        .await?;

    // Tracked jobs: one row per unique posting identifier
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS tracked_jobs (
            post_id INTEGER PRIMARY KEY,
            position TEXT NOT NULL,
            unit_name TEXT NOT NULL,
            url TEXT NOT NULL,
            image_url TEXT NOT NULL,
            categories TEXT NOT NULL,
            units TEXT NOT NULL,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            appearance_count INTEGER NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create tracked_jobs table")?;

    // Status history: append-only, one entry per snapshot a job appears in
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL REFERENCES tracked_jobs(post_id) ON DELETE CASCADE,
            seen_at TEXT NOT NULL,
            status TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create status_history table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_status_history_post ON status_history(post_id, seen_at)")
        .execute(pool)
        .await?;

    // Detail pages: at-most-once enrichment marks plus derived metadata
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS detail_pages (
            post_id INTEGER PRIMARY KEY,
            url TEXT NOT NULL,
            html_path TEXT NOT NULL,
            status TEXT NOT NULL,
            title TEXT,
            unit TEXT,
            unit_url TEXT,
            modified_date TEXT,
            requirements TEXT NOT NULL,
            content TEXT NOT NULL,
            downloaded_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create detail_pages table")?;

    Ok(())
}
