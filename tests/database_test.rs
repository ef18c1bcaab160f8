//! Integration tests for snapshot registration and the tracked-job fold.

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use vacancy_tracker::db::{
    count_snapshots, count_tracked_jobs, get_all_snapshots, get_all_tracked_jobs,
    get_snapshot_by_source_file, get_status_history, get_tracked_job, load_snapshot,
    register_snapshot, Database,
};
use vacancy_tracker::parser::{Posting, PostingStatus, Snapshot};
use vacancy_tracker::tracker;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 10, hour, 0, 0).unwrap()
}

fn posting(post_id: i64, status: PostingStatus) -> Posting {
    Posting {
        post_id,
        url: format!("https://jobs.example/vacancies/{post_id}/"),
        unit_name: "93rd Brigade".to_string(),
        position: format!("Position {post_id}"),
        image_url: format!("https://jobs.example/img/{post_id}.jpg"),
        categories: vec!["category-it".to_string()],
        units: vec!["units-93".to_string()],
        status,
    }
}

fn snapshot(name: &str, hour: u32, posts: Vec<Posting>) -> Snapshot {
    Snapshot {
        source_file: format!("2025/12/10/output_{name}.html"),
        parsed_at: ts(hour),
        post_count: posts.len(),
        posts,
    }
}

#[tokio::test]
async fn test_register_snapshot_creates_tracked_jobs() {
    let (db, _temp_dir) = setup_db().await;

    let snap = snapshot(
        "a",
        1,
        vec![
            posting(100, PostingStatus::Open),
            posting(101, PostingStatus::Closed),
        ],
    );
    let id = register_snapshot(db.pool(), &snap, "hash-a")
        .await
        .expect("Failed to register snapshot");
    assert!(id > 0);

    assert_eq!(count_snapshots(db.pool()).await.unwrap(), 1);
    assert_eq!(count_tracked_jobs(db.pool()).await.unwrap(), 2);

    let job = get_tracked_job(db.pool(), 100)
        .await
        .unwrap()
        .expect("Job not found");
    assert_eq!(job.position, "Position 100");
    assert_eq!(job.appearance_count, 1);
    assert!(!job.is_closed());

    let closed = get_tracked_job(db.pool(), 101).await.unwrap().unwrap();
    assert!(closed.is_closed());
}

#[tokio::test]
async fn test_fold_across_snapshots() {
    let (db, _temp_dir) = setup_db().await;

    let s1 = snapshot("a", 1, vec![posting(100, PostingStatus::Open)]);
    let s2 = snapshot("b", 2, vec![posting(100, PostingStatus::Open)]);
    let s3 = snapshot("c", 3, vec![posting(100, PostingStatus::Closed)]);
    register_snapshot(db.pool(), &s1, "hash-a").await.unwrap();
    register_snapshot(db.pool(), &s2, "hash-b").await.unwrap();
    register_snapshot(db.pool(), &s3, "hash-c").await.unwrap();

    let job = get_tracked_job(db.pool(), 100).await.unwrap().unwrap();
    assert_eq!(job.appearance_count, 3);
    assert_eq!(job.first_seen, ts(1));
    assert_eq!(job.last_seen, ts(3));
    assert!(job.is_closed());

    let history = get_status_history(db.pool(), 100).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].status, PostingStatus::Open);
    assert_eq!(history[2].status, PostingStatus::Closed);
}

#[tokio::test]
async fn test_duplicate_source_file_rejected() {
    let (db, _temp_dir) = setup_db().await;

    let snap = snapshot("a", 1, vec![posting(100, PostingStatus::Open)]);
    register_snapshot(db.pool(), &snap, "hash-a").await.unwrap();

    let err = register_snapshot(db.pool(), &snap, "hash-other")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));
    assert_eq!(count_snapshots(db.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_content_hash_rejected() {
    let (db, _temp_dir) = setup_db().await;

    let s1 = snapshot("a", 1, vec![posting(100, PostingStatus::Open)]);
    let s2 = snapshot("b", 2, vec![posting(100, PostingStatus::Open)]);
    register_snapshot(db.pool(), &s1, "same-hash").await.unwrap();

    let err = register_snapshot(db.pool(), &s2, "same-hash")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duplicates the content"));
}

#[tokio::test]
async fn test_out_of_order_snapshot_rejected() {
    let (db, _temp_dir) = setup_db().await;

    let s1 = snapshot("b", 2, vec![posting(100, PostingStatus::Open)]);
    let s2 = snapshot("a", 1, vec![posting(100, PostingStatus::Open)]);
    register_snapshot(db.pool(), &s1, "hash-b").await.unwrap();

    let err = register_snapshot(db.pool(), &s2, "hash-a")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("out-of-order"));

    // The rejected snapshot left no partial state.
    assert_eq!(count_snapshots(db.pool()).await.unwrap(), 1);
    let job = get_tracked_job(db.pool(), 100).await.unwrap().unwrap();
    assert_eq!(job.appearance_count, 1);
}

#[tokio::test]
async fn test_load_snapshot_roundtrip() {
    let (db, _temp_dir) = setup_db().await;

    let snap = snapshot(
        "a",
        1,
        vec![
            posting(100, PostingStatus::Open),
            posting(101, PostingStatus::Closed),
            posting(102, PostingStatus::Open),
        ],
    );
    register_snapshot(db.pool(), &snap, "hash-a").await.unwrap();

    let row = get_snapshot_by_source_file(db.pool(), &snap.source_file)
        .await
        .unwrap()
        .expect("Snapshot not found");
    assert_eq!(row.post_count, 3);
    assert_eq!(row.content_hash, "hash-a");

    let loaded = load_snapshot(db.pool(), &row).await.unwrap();
    assert_eq!(loaded, snap);
}

#[tokio::test]
async fn test_db_fold_matches_pure_replay() {
    let (db, _temp_dir) = setup_db().await;

    let snapshots = vec![
        snapshot(
            "a",
            1,
            vec![posting(100, PostingStatus::Open), posting(101, PostingStatus::Open)],
        ),
        snapshot(
            "b",
            2,
            vec![posting(101, PostingStatus::Closed), posting(102, PostingStatus::Open)],
        ),
        snapshot("c", 3, vec![posting(100, PostingStatus::Closed)]),
    ];

    for (i, snap) in snapshots.iter().enumerate() {
        register_snapshot(db.pool(), snap, &format!("hash-{i}"))
            .await
            .unwrap();
    }

    // Replaying the stored snapshots through the pure fold yields exactly
    // the job map the incremental database fold produced.
    let rows = get_all_snapshots(db.pool()).await.unwrap();
    let mut replayed = Vec::new();
    for row in &rows {
        replayed.push(load_snapshot(db.pool(), row).await.unwrap());
    }
    let expected = tracker::replay(replayed.iter()).unwrap();

    let actual = get_all_tracked_jobs(db.pool()).await.unwrap();
    assert_eq!(actual, expected);
}
