//! Integration tests for detail-page enrichment.

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vacancy_tracker::config::Config;
use vacancy_tracker::db::{
    count_detail_pages, count_unenriched_jobs, get_detail_page, register_snapshot, Database,
};
use vacancy_tracker::enricher::{job_page_path, Enricher};
use vacancy_tracker::parser::{Posting, PostingStatus, Snapshot};

async fn setup(server: &MockServer) -> (Config, Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::for_testing();
    config.data_dir = temp_dir.path().to_path_buf();
    config.database_path = temp_dir.path().join("test.sqlite");
    config.listing_url = format!("{}/jobs", server.uri());

    let db = Database::new(&config.database_path)
        .await
        .expect("Failed to create database");
    (config, db, temp_dir)
}

fn posting(server: &MockServer, post_id: i64) -> Posting {
    Posting {
        post_id,
        url: format!("{}/vacancies/{post_id}/", server.uri()),
        unit_name: "93rd Brigade".to_string(),
        position: format!("Position {post_id}"),
        image_url: String::new(),
        categories: vec![],
        units: vec![],
        status: PostingStatus::Open,
    }
}

async fn register_jobs(db: &Database, server: &MockServer, ids: impl Iterator<Item = i64>) {
    let posts: Vec<Posting> = ids.map(|id| posting(server, id)).collect();
    let snap = Snapshot {
        source_file: "2025/12/10/output_20251210_120000.html".to_string(),
        parsed_at: Utc.with_ymd_and_hms(2025, 12, 10, 12, 0, 0).unwrap(),
        post_count: posts.len(),
        posts,
    };
    register_snapshot(db.pool(), &snap, "hash-a")
        .await
        .expect("Failed to register snapshot");
}

fn detail_body(post_id: i64) -> String {
    format!(
        r#"<html><body><main>
            <h1 class="vacancy-name">Vacancy {post_id}</h1>
            <a href="/brigades/93/">93rd Brigade</a>
            <p>Details for {post_id}.</p>
        </main></body></html>"#
    )
}

async fn mount_detail_pages(server: &MockServer, ids: impl Iterator<Item = i64>) {
    for id in ids {
        Mock::given(method("GET"))
            .and(path(format!("/vacancies/{id}/")))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_body(id)))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_batch_cap_limits_downloads_per_run() {
    let server = MockServer::start().await;
    let (mut config, db, _temp_dir) = setup(&server).await;
    config.enrich_batch_cap = 100;

    register_jobs(&db, &server, 1..=150).await;
    mount_detail_pages(&server, 1..=150).await;

    let enricher = Enricher::new(config.clone(), db.clone()).unwrap();

    // First run: exactly the cap.
    let first = enricher.run_once().await.unwrap();
    assert_eq!(first.new_jobs_found, 150);
    assert_eq!(first.jobs_downloaded, 100);
    assert_eq!(first.download_successful, 100);
    assert_eq!(first.download_failed, 0);
    assert_eq!(count_detail_pages(db.pool()).await.unwrap(), 100);
    assert_eq!(count_unenriched_jobs(db.pool()).await.unwrap(), 50);

    // Ascending identifier order means the lowest 100 went first.
    assert!(get_detail_page(db.pool(), 100).await.unwrap().is_some());
    assert!(get_detail_page(db.pool(), 101).await.unwrap().is_none());

    // Second run drains the remainder.
    let second = enricher.run_once().await.unwrap();
    assert_eq!(second.new_jobs_found, 50);
    assert_eq!(second.download_successful, 50);
    assert_eq!(count_unenriched_jobs(db.pool()).await.unwrap(), 0);

    // Third run has nothing to do.
    let third = enricher.run_once().await.unwrap();
    assert_eq!(third.new_jobs_found, 0);
    assert_eq!(third.jobs_downloaded, 0);
}

#[tokio::test]
async fn test_download_is_at_most_once() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    register_jobs(&db, &server, [7].into_iter()).await;

    Mock::given(method("GET"))
        .and(path("/vacancies/7/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_body(7)))
        .expect(1)
        .mount(&server)
        .await;

    let enricher = Enricher::new(config, db.clone()).unwrap();
    enricher.run_once().await.unwrap();
    enricher.run_once().await.unwrap();
    enricher.run_once().await.unwrap();

    assert_eq!(count_detail_pages(db.pool()).await.unwrap(), 1);
    server.verify().await;
}

#[tokio::test]
async fn test_failed_download_stays_in_backlog() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    register_jobs(&db, &server, [1, 2].into_iter()).await;

    Mock::given(method("GET"))
        .and(path("/vacancies/1/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/vacancies/2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_body(2)))
        .mount(&server)
        .await;

    let enricher = Enricher::new(config, db.clone()).unwrap();
    let summary = enricher.run_once().await.unwrap();

    assert_eq!(summary.download_successful, 1);
    assert_eq!(summary.download_failed, 1);
    assert!(get_detail_page(db.pool(), 1).await.unwrap().is_none());
    assert!(get_detail_page(db.pool(), 2).await.unwrap().is_some());

    // Still awaiting enrichment; a later run retries it.
    assert_eq!(count_unenriched_jobs(db.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_enrichment_writes_files_and_metadata() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    register_jobs(&db, &server, [12345].into_iter()).await;
    mount_detail_pages(&server, [12345].into_iter()).await;

    let enricher = Enricher::new(config.clone(), db.clone()).unwrap();
    enricher.run_once().await.unwrap();

    let html_path = job_page_path(&config.job_pages_dir(), 12345);
    assert!(html_path.exists());
    assert!(html_path.to_string_lossy().contains("012/345/job_12345.html"));
    assert!(html_path.with_extension("json").exists());

    let page = get_detail_page(db.pool(), 12345).await.unwrap().unwrap();
    assert_eq!(page.title.as_deref(), Some("Vacancy 12345"));
    assert_eq!(page.unit.as_deref(), Some("93rd Brigade"));
    assert_eq!(page.status, "open");
}

#[tokio::test]
async fn test_stats_record_appended_even_when_idle() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    let enricher = Enricher::new(config.clone(), db).unwrap();
    enricher.run_once().await.unwrap();
    enricher.run_once().await.unwrap();

    let body = tokio::fs::read_to_string(config.stats_log_path())
        .await
        .expect("Stats log missing");
    assert_eq!(body.lines().count(), 2);

    let record: serde_json::Value = serde_json::from_str(body.lines().next().unwrap()).unwrap();
    assert_eq!(record["new_jobs_found"], 0);
    assert!(record["timestamp"].is_string());
}
