use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use super::pages;
use super::AppState;
use crate::db::{count_detail_pages, count_snapshots, get_all_tracked_jobs, get_detail_page, get_tracked_job};
use crate::fs_utils;
use crate::stats;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/job/:id", get(job_detail))
        .route("/healthz", get(health))
        .route("/api/jobs", get(api_jobs))
        .route("/api/stats", get(api_stats))
        .route("/api/runs", get(api_runs))
}

// ========== HTML Routes ==========

async fn home(State(state): State<AppState>) -> Response {
    let jobs = match get_all_tracked_jobs(state.db.pool()).await {
        Ok(j) => j,
        Err(e) => {
            tracing::error!("Failed to fetch tracked jobs: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };
    let snapshot_count = count_snapshots(state.db.pool()).await.unwrap_or(0);
    let enriched_count = count_detail_pages(state.db.pool()).await.unwrap_or(0);

    let summary = stats::summarize(&jobs, 10);
    let html = pages::render_home(&summary, &jobs, snapshot_count, enriched_count);
    Html(html.into_string()).into_response()
}

async fn job_detail(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let job = match get_tracked_job(state.db.pool(), id).await {
        Ok(Some(j)) => j,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Job not found").into_response();
        }
        Err(e) => {
            tracing::error!("Failed to fetch tracked job: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };

    let detail = match get_detail_page(state.db.pool(), id).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("Failed to fetch detail page: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response();
        }
    };

    let html = pages::render_job(&job, detail.as_ref());
    Html(html.into_string()).into_response()
}

async fn health() -> &'static str {
    "ok"
}

// ========== API Routes ==========

async fn api_jobs(State(state): State<AppState>) -> Response {
    match get_all_tracked_jobs(state.db.pool()).await {
        Ok(jobs) => {
            let jobs: Vec<_> = jobs.into_values().collect();
            Json(jobs).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to fetch tracked jobs: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

async fn api_stats(State(state): State<AppState>) -> Response {
    match get_all_tracked_jobs(state.db.pool()).await {
        Ok(jobs) => Json(stats::summarize(&jobs, 10)).into_response(),
        Err(e) => {
            tracing::error!("Failed to fetch tracked jobs: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunsParams {
    limit: Option<usize>,
}

/// Bound on bytes read from the end of the run-statistics log per request.
/// The log is append-only and grows for the life of the service, so it is
/// never read whole.
const RUNS_LOG_TAIL_BYTES: u64 = 512 * 1024;

/// Most recent run-statistics records, newest first.
async fn api_runs(State(state): State<AppState>, Query(params): Query<RunsParams>) -> Response {
    let limit = params.limit.unwrap_or(50).min(1000);
    let path = state.config.stats_log_path();

    let lines = match fs_utils::tail_lines(&path, limit, RUNS_LOG_TAIL_BYTES).await {
        Ok(lines) => lines,
        Err(e) => {
            tracing::error!("Failed to read run statistics log: {e:#}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Log read error").into_response();
        }
    };

    let mut records: Vec<serde_json::Value> = lines
        .iter()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    records.reverse();

    Json(records).into_response()
}
