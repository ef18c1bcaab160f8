//! Maud templates for the dashboard.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use maud::{html, Markup, DOCTYPE};

use crate::db::DetailPageRow;
use crate::stats::TrackerSummary;
use crate::tracker::TrackedJob;

fn base_layout(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" data-theme="auto" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                meta name="color-scheme" content="light dark";
                title { (title) " - Vacancy Tracker" }
                link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/@picocss/pico@2/css/pico.min.css";
            }
            body {
                header class="container" {
                    nav {
                        ul {
                            li { a href="/" { strong { "Vacancy Tracker" } } }
                        }
                        ul {
                            li { a href="/" { "Jobs" } }
                            li { a href="/api/stats" { "Stats JSON" } }
                            li { a href="/api/runs" { "Runs" } }
                        }
                    }
                }
                main class="container" {
                    (content)
                }
                footer class="container" {
                    small { "Vacancy Tracker" }
                }
            }
        }
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// Dashboard home: summary figures plus the full tracked-job table.
#[must_use]
pub fn render_home(
    summary: &TrackerSummary,
    jobs: &BTreeMap<i64, TrackedJob>,
    snapshot_count: i64,
    enriched_count: i64,
) -> Markup {
    let content = html! {
        h1 { "Tracked Jobs" }

        section {
            div class="grid" {
                article {
                    h3 { (summary.total_unique) }
                    p { "unique jobs" }
                }
                article {
                    h3 { (summary.open_count) }
                    p { "open" }
                }
                article {
                    h3 { (summary.closed_count) }
                    p { "closed" }
                }
                article {
                    h3 { (snapshot_count) }
                    p { "snapshots" }
                }
                article {
                    h3 { (enriched_count) }
                    p { "detail pages" }
                }
            }
            @if let (Some(first), Some(last)) = (summary.first_seen, summary.last_seen) {
                p {
                    small { "Observations from " (format_ts(first)) " to " (format_ts(last)) " UTC" }
                }
            }
        }

        @if !summary.top_units.is_empty() {
            section {
                h2 { "Top Units" }
                table {
                    thead { tr { th { "Unit" } th { "Jobs" } } }
                    tbody {
                        @for unit in &summary.top_units {
                            tr {
                                td { (unit.unit_name) }
                                td { (unit.count) }
                            }
                        }
                    }
                }
            }
        }

        section {
            h2 { "All Jobs" }
            @if jobs.is_empty() {
                p { "No jobs tracked yet." }
            } @else {
                table {
                    thead {
                        tr {
                            th { "ID" }
                            th { "Position" }
                            th { "Unit" }
                            th { "Status" }
                            th { "First seen" }
                            th { "Last seen" }
                            th { "Seen" }
                        }
                    }
                    tbody {
                        @for job in jobs.values() {
                            tr {
                                td { a href={ "/job/" (job.post_id) } { (job.post_id) } }
                                td { (job.position) }
                                td { (job.unit_name) }
                                td { (job.current_status().as_str()) }
                                td { (format_ts(job.first_seen)) }
                                td { (format_ts(job.last_seen)) }
                                td { (job.appearance_count) }
                            }
                        }
                    }
                }
            }
        }
    };

    base_layout("Jobs", content)
}

/// Job detail: longitudinal history plus enrichment metadata when present.
#[must_use]
pub fn render_job(job: &TrackedJob, detail: Option<&DetailPageRow>) -> Markup {
    let title = format!("Job {}", job.post_id);
    let content = html! {
        h1 { (job.position) }
        p {
            strong { (job.unit_name) }
            " | " (job.current_status().as_str())
            " | seen " (job.appearance_count) " times"
        }
        @if !job.url.is_empty() {
            p { a href=(job.url) { (job.url) } }
        }
        @if !job.categories.is_empty() {
            p { small { "Categories: " (job.categories.join(", ")) } }
        }

        section {
            h2 { "Status History" }
            table {
                thead { tr { th { "Seen at" } th { "Status" } } }
                tbody {
                    @for entry in &job.status_history {
                        tr {
                            td { (format_ts(entry.seen_at)) }
                            td { (entry.status.as_str()) }
                        }
                    }
                }
            }
        }

        @if let Some(detail) = detail {
            section {
                h2 { "Detail Page" }
                p { small { "Downloaded " (detail.downloaded_at) } }
                @if let Some(ref title) = detail.title {
                    p { strong { (title) } }
                }
                @if let Some(ref unit) = detail.unit {
                    p {
                        "Unit: "
                        @if let Some(ref unit_url) = detail.unit_url {
                            a href=(unit_url) { (unit) }
                        } @else {
                            (unit)
                        }
                    }
                }
                @if let Some(ref modified) = detail.modified_date {
                    p { small { "Last modified " (modified) } }
                }
            }
        } @else {
            p { small { "Detail page not downloaded yet." } }
        }
    };

    base_layout(&title, content)
}
