mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

/// Writers are the scrape loop and the enrichment loop; everything else is
/// dashboard reads. A handful of connections covers that comfortably, and
/// SQLite serializes writers under WAL regardless of pool size.
const MAX_POOL_CONNECTIONS: u32 = 4;

/// How long a connection waits on a held write lock before surfacing
/// SQLITE_BUSY. Snapshot folds and enrichment inserts can land at the same
/// moment, so an immediate failure would be spurious.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the tracker database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `path`, run pending
    /// migrations, and verify it accepts writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, a migration fails,
    /// or the database is read-only.
    pub async fn new(path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect_with(Self::connect_options(path))
            .await
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;

        migrations::run(&pool).await?;
        info!("Database migrations complete");

        let db = Self { pool };
        db.check_writable(path).await?;

        Ok(db)
    }

    fn connect_options(path: &Path) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
    }

    /// A data directory mounted read-only or owned by another user should
    /// fail startup here, not minutes later inside the first snapshot fold
    /// as "attempt to write a readonly database". Beginning and committing
    /// a transaction requires write capability on SQLite.
    async fn check_writable(&self, path: &Path) -> Result<()> {
        self.pool
            .begin()
            .await
            .with_context(|| {
                format!(
                    "SQLite database is not writable: {}. Check data directory permissions",
                    path.display()
                )
            })?
            .commit()
            .await
            .context("Failed to finish SQLite write check")
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_creates_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tracker.sqlite");

        let db = Database::new(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(count_snapshots(db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tracker.sqlite");

        drop(Database::new(&path).await.unwrap());
        // Migrations must not re-run or fail against an existing schema.
        let db = Database::new(&path).await.unwrap();
        assert_eq!(count_tracked_jobs(db.pool()).await.unwrap(), 0);
    }
}
