use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Listing scrape
    pub listing_url: String,
    pub scrape_interval: Duration,
    pub cache_window: Duration,
    pub fetch_timeout: Duration,
    pub load_more_max_attempts: u32,
    pub load_more_settle: Duration,
    pub chrome_path: Option<String>,

    // Data layout
    pub data_dir: PathBuf,
    pub database_path: PathBuf,

    // Detail-page enrichment
    pub enrich_interval: Duration,
    pub enrich_batch_cap: usize,
    pub enrich_timeout: Duration,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Listing scrape
            listing_url: required_env("LISTING_URL")?,
            scrape_interval: Duration::from_secs(parse_env_u64("SCRAPE_INTERVAL_SECS", 3600)?),
            cache_window: Duration::from_secs(parse_env_u64("CACHE_WINDOW_SECS", 3600)?),
            fetch_timeout: Duration::from_secs(parse_env_u64("FETCH_TIMEOUT_SECS", 600)?),
            load_more_max_attempts: parse_env_u32("LOAD_MORE_MAX_ATTEMPTS", 100)?,
            load_more_settle: Duration::from_millis(parse_env_u64("LOAD_MORE_SETTLE_MS", 2000)?),
            chrome_path: optional_env("CHROME_PATH"),

            // Data layout
            data_dir: PathBuf::from(env_or_default("DATA_DIR", "./data")),
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/tracker.sqlite",
            )),

            // Detail-page enrichment
            enrich_interval: Duration::from_secs(parse_env_u64("ENRICH_INTERVAL_SECS", 3600)?),
            enrich_batch_cap: parse_env_usize("ENRICH_BATCH_CAP", 100)?,
            enrich_timeout: Duration::from_secs(parse_env_u64("ENRICH_TIMEOUT_SECS", 5)?),

            // Web server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listing_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "LISTING_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.listing_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "LISTING_URL".to_string(),
                message: format!("not a valid URL: {}", self.listing_url),
            });
        }
        if self.enrich_batch_cap == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ENRICH_BATCH_CAP".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.load_more_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LOAD_MORE_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration with test-friendly defaults; tests override what they need.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            listing_url: "http://127.0.0.1:1/jobs".to_string(),
            scrape_interval: Duration::from_secs(3600),
            cache_window: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(30),
            load_more_max_attempts: 5,
            load_more_settle: Duration::from_millis(10),
            chrome_path: None,
            data_dir: PathBuf::from("./data"),
            database_path: PathBuf::from("./data/tracker.sqlite"),
            enrich_interval: Duration::from_secs(3600),
            enrich_batch_cap: 100,
            enrich_timeout: Duration::from_secs(2),
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
        }
    }

    /// Directory-sharded store for downloaded detail pages.
    #[must_use]
    pub fn job_pages_dir(&self) -> PathBuf {
        self.data_dir.join("job-pages")
    }

    /// Directory for dashboard-facing JSON exports.
    #[must_use]
    pub fn api_dir(&self) -> PathBuf {
        self.data_dir.join("api")
    }

    /// Append-only run-statistics log, one JSON record per line.
    #[must_use]
    pub fn stats_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("run_stats.jsonl")
    }

    /// Marker file providing mutual exclusion for pipeline runs.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(".pipeline.lock")
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
