//! Shared constants used across the application.

/// User agent string used for detail-page HTTP requests.
///
/// A realistic browser user agent so download requests look like normal
/// browser traffic to the listing site.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Marker text on an individual detail page indicating the vacancy is closed.
///
/// This is a content-level signal distinct from the `tors-status-*` class
/// on listing-page fragments.
pub const DETAIL_CLOSED_MARKER: &str = "На жаль, вакансія вже закрита!";

/// Filename prefix for raw listing-page artifacts (`output_YYYYMMDD_HHMMSS.html`).
pub const RAW_ARTIFACT_PREFIX: &str = "output_";

/// Timestamp format embedded in raw artifact filenames.
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Filename of the consolidated tracked-jobs export under the data directory.
pub const CONSOLIDATED_FILE_NAME: &str = "consolidated_unique.json";

/// Upper bound on extracted detail-page content, in characters.
pub const MAX_DETAIL_CONTENT_CHARS: usize = 50_000;
