//! Vacancy tracker library.
//!
//! A service that scrapes a "load more" paginated vacancy listing with a
//! headless browser, extracts structured postings, deduplicates and tracks
//! them across scrape runs, enriches known postings with their individual
//! detail pages, and serves the dataset through a small web dashboard.

pub mod config;
pub mod constants;
pub mod db;
pub mod enricher;
pub mod export;
pub mod fetcher;
pub mod fs_utils;
pub mod lock;
pub mod parser;
pub mod pipeline;
pub mod stats;
pub mod tracker;
pub mod web;
