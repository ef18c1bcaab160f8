//! Listing-page fetcher using headless Chrome/Chromium.
//!
//! Drives a headless browser to fully expand the "load more" paginated
//! listing and persists the rendered markup as a timestamped raw artifact.
//! The browser is lazily initialized on first use and reused across runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constants::{ARTIFACT_TIMESTAMP_FORMAT, RAW_ARTIFACT_PREFIX};
use crate::fs_utils;

/// CSS selector of the listing page's "load more" affordance.
const LOAD_MORE_SELECTOR: &str = "#load-more";

/// Class the affordance carries once all content is loaded.
const LOAD_MORE_DONE_CLASS: &str = "done";

/// Listing fetch service.
///
/// Manages a headless browser instance for fetching the listing page.
pub struct ListingFetcher {
    listing_url: String,
    data_dir: PathBuf,
    max_attempts: u32,
    settle: Duration,
    fetch_timeout: Duration,
    chrome_path: Option<String>,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl ListingFetcher {
    /// Create a new listing fetcher.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            listing_url: config.listing_url.clone(),
            data_dir: config.data_dir.clone(),
            max_attempts: config.load_more_max_attempts,
            settle: config.load_more_settle,
            fetch_timeout: config.fetch_timeout,
            chrome_path: config.chrome_path.clone(),
            browser: Arc::new(Mutex::new(None)),
        }
    }

    /// Initialize the browser if not already running.
    async fn ensure_browser(&self) -> Result<()> {
        let mut browser_guard = self.browser.lock().await;
        if browser_guard.is_some() {
            return Ok(());
        }

        info!("Initializing headless browser for listing fetch");

        let mut config_builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--mute-audio")
            .arg("--hide-scrollbars");

        if let Some(ref chrome_path) = self.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        // Spawn handler in background
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        *browser_guard = Some(browser);
        info!("Headless browser initialized");

        Ok(())
    }

    /// Fetch the listing page with all content expanded and persist it as a
    /// raw artifact under `<data_dir>/YYYY/MM/DD/output_YYYYMMDD_HHMMSS.html`.
    ///
    /// The whole navigate-expand-capture sequence runs under the configured
    /// wall-clock deadline. Not reaching the terminal "done" state within
    /// the attempt bound is a soft degradation: whatever loaded is
    /// persisted. Navigation failures are hard failures and no artifact is
    /// produced.
    ///
    /// # Errors
    ///
    /// Returns an error on browser launch, navigation, deadline, or write
    /// failures.
    pub async fn fetch_listing(&self) -> Result<PathBuf> {
        self.ensure_browser().await?;

        let browser_guard = self.browser.lock().await;
        let browser = browser_guard.as_ref().context("Browser not initialized")?;

        info!(url = %self.listing_url, "Fetching listing page");

        // The page handle lives outside the timed section. The browser is
        // reused across runs, so a page dropped without close would leave
        // its tab open for the life of the process; closing here covers
        // every exit path, deadline included.
        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser page")?;

        let captured = with_deadline(
            self.fetch_timeout,
            "listing fetch",
            self.capture_listing(&page),
        )
        .await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page: {e}");
        }
        let html = captured?;

        let path = self.artifact_path();
        fs_utils::write_atomic(&path, html.as_bytes())
            .await
            .context("Failed to persist listing artifact")?;
        info!(path = %path.display(), bytes = html.len(), "Listing artifact saved");

        Ok(path)
    }

    /// Navigate to the listing, expand it, and return the rendered markup.
    async fn capture_listing(&self, page: &chromiumoxide::Page) -> Result<String> {
        page.goto(self.listing_url.as_str())
            .await
            .context("Failed to navigate to listing page")?;
        page.wait_for_navigation()
            .await
            .context("Listing page navigation did not settle")?;

        self.expand_listing(page).await;

        page.content()
            .await
            .context("Failed to read listing page content")
    }

    /// Click the "load more" affordance until it signals completion or the
    /// attempt bound is reached.
    async fn expand_listing(&self, page: &chromiumoxide::Page) {
        let mut attempt = 0u32;

        while attempt < self.max_attempts {
            attempt += 1;

            let button = match page.find_element(LOAD_MORE_SELECTOR).await {
                Ok(button) => button,
                Err(e) => {
                    // No affordance on the page; nothing further to expand.
                    debug!(attempt, "No load-more element: {e}");
                    return;
                }
            };

            match button.attribute("class").await {
                Ok(Some(class)) if class.contains(LOAD_MORE_DONE_CLASS) => {
                    debug!(attempt, "All listing content loaded");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(attempt, "Failed to read load-more class: {e}");
                    return;
                }
            }

            debug!(attempt, "Clicking load-more");
            if let Err(e) = button.click().await {
                debug!(attempt, "Load-more click failed: {e}");
                return;
            }

            // Let pending requests and DOM updates settle before the next check.
            tokio::time::sleep(self.settle).await;
        }

        // Soft degradation: persist whatever loaded.
        warn!(
            max_attempts = self.max_attempts,
            "Load-more attempt bound reached without terminal state; listing may be partial"
        );
    }

    fn artifact_path(&self) -> PathBuf {
        let now = Utc::now();
        self.data_dir
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(now.format("%d").to_string())
            .join(format!(
                "{RAW_ARTIFACT_PREFIX}{}.html",
                now.format(ARTIFACT_TIMESTAMP_FORMAT)
            ))
    }

    /// Shutdown the browser gracefully.
    pub async fn shutdown(&self) {
        let mut browser_guard = self.browser.lock().await;
        if let Some(mut browser) = browser_guard.take() {
            if let Err(e) = browser.close().await {
                error!("Failed to close browser: {e}");
            } else {
                info!("Browser shutdown complete");
            }
        }
    }
}

/// Run a fallible future under a hard wall-clock deadline.
///
/// The deadline is applied here rather than by callers so cancellation can
/// never skip the page cleanup in [`ListingFetcher::fetch_listing`].
async fn with_deadline<T>(
    limit: Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("{what} timed out after {}s", limit.as_secs()),
    }
}

/// Find the newest raw artifact younger than `window`, if any.
///
/// Lets a run reuse a recent capture instead of driving the browser again.
///
/// # Errors
///
/// Returns an error if the data directory cannot be scanned.
pub async fn find_recent_artifact(
    data_dir: &Path,
    window: Duration,
) -> Result<Option<PathBuf>> {
    let artifacts = fs_utils::collect_files(data_dir, RAW_ARTIFACT_PREFIX, ".html").await?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for path in artifacts {
        let modified = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat artifact: {}", path.display()))?
            .modified()
            .context("Filesystem does not report modification times")?;
        if newest.as_ref().is_none_or(|(ts, _)| modified > *ts) {
            newest = Some((modified, path));
        }
    }

    let Some((modified, path)) = newest else {
        return Ok(None);
    };

    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    if age < window {
        debug!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "Recent listing artifact found within cache window"
        );
        Ok(Some(path))
    } else {
        Ok(None)
    }
}
