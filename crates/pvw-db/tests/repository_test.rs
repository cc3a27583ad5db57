//! Integration tests for the file, job, and scan repositories.
//!
//! Require PostgreSQL (`DATABASE_URL`); run with `cargo test -- --ignored`.
//! Claiming tests hold `SERIAL` so they do not steal each other's jobs.

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use pvw_db::test_fixtures::{connect_test_database, insert_test_file};
use pvw_db::{
    CreateScanRequest, Database, Error, FailOutcome, FileKind, FileRepository, FileStatus,
    JobListFilter, JobRepository, JobStatus, OperationType, PgJobRepository, ProcessingJob,
    QueueName, ScanRepository, ScanStatus,
};

static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn setup() -> Database {
    let db = connect_test_database()
        .await
        .expect("Failed to connect to test database");
    let jobs = PgJobRepository::new(db.pool.clone()).with_retry_countdown(Duration::zero());
    db.with_jobs(jobs)
}

/// Claim until `job_id` comes up; unrelated leftovers are completed and skipped.
async fn claim_job(db: &Database, job_id: Uuid) -> ProcessingJob {
    for _ in 0..100 {
        let claimed = db
            .jobs
            .claim_next_for_queues(&[])
            .await
            .expect("claim failed")
            .expect("queue unexpectedly empty");
        if claimed.id == job_id {
            return claimed;
        }
        db.jobs.complete(claimed.id, None).await.expect("complete failed");
    }
    panic!("job {} was never claimed", job_id);
}

#[tokio::test]
#[ignore]
async fn test_file_insert_get_and_soft_delete() {
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Csv, "/tmp/none.csv")
        .await
        .unwrap();

    assert_eq!(file.status, FileStatus::Uploaded);
    assert_eq!(file.kind, FileKind::Csv);

    let fetched = db.files.get(file.id).await.unwrap().unwrap();
    assert_eq!(fetched.filename, file.filename);

    db.files
        .update_status(file.id, FileStatus::Processing)
        .await
        .unwrap();
    assert!(db.files.mark_deleted(file.id).await.unwrap());
    assert!(!db.files.mark_deleted(file.id).await.unwrap());

    let listed = db.files.list(500, 0).await.unwrap();
    assert!(listed.iter().all(|f| f.id != file.id));

    let err = db
        .files
        .update_status(file.id, FileStatus::Processed)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_files_listed_as_expired_after_cutoff() {
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Txt, "/tmp/none.txt")
        .await
        .unwrap();

    let expired = db
        .files
        .list_expired(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert!(expired.iter().any(|f| f.id == file.id));

    let not_yet = db
        .files
        .list_expired(Utc::now() - Duration::days(1))
        .await
        .unwrap();
    assert!(not_yet.iter().all(|f| f.id != file.id));
}

#[tokio::test]
#[ignore]
async fn test_queue_for_missing_file_fails() {
    let db = setup().await;
    let err = db
        .jobs
        .queue(Uuid::new_v4(), OperationType::DataProfiling, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_queue_routes_and_sets_retry_budget() {
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Csv, "/tmp/none.csv")
        .await
        .unwrap();

    let profiling = db
        .jobs
        .queue(file.id, OperationType::DataProfiling, Some(json!({"top_n": 3})))
        .await
        .unwrap();
    assert_eq!(profiling.status, JobStatus::Queued);
    assert_eq!(profiling.queue, QueueName::FileProcessing);
    assert_eq!(profiling.max_retries, 3);
    assert_eq!(profiling.options, Some(json!({"top_n": 3})));

    let import = db
        .jobs
        .queue(file.id, OperationType::ImportEntities, None)
        .await
        .unwrap();
    assert_eq!(import.queue, QueueName::DataOperations);
    assert_eq!(import.max_retries, 0);

    let for_file = db.jobs.list_for_file(file.id).await.unwrap();
    assert_eq!(for_file.len(), 2);

    let filtered = db
        .jobs
        .list(&JobListFilter {
            file_id: Some(file.id),
            operation_type: Some(OperationType::ImportEntities),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, import.id);
}

#[tokio::test]
#[ignore]
async fn test_retry_keeps_processing_until_exhausted() {
    let _guard = SERIAL.lock().await;
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Csv, "/tmp/none.csv")
        .await
        .unwrap();
    let job = db
        .jobs
        .queue(file.id, OperationType::MetadataExtraction, None)
        .await
        .unwrap();

    for attempt in 1..=3 {
        let claimed = claim_job(&db, job.id).await;
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, attempt);

        let outcome = db.jobs.fail(job.id, "parse error").await.unwrap();
        assert!(matches!(
            outcome,
            FailOutcome::RetryScheduled { attempt: a, .. } if a == attempt
        ));

        // Never moves back to queued while waiting
        let current = db.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Processing);
        assert!(current.retry_at.is_some());
    }

    claim_job(&db, job.id).await;
    let outcome = db.jobs.fail(job.id, "still broken").await.unwrap();
    assert_eq!(outcome, FailOutcome::Failed);

    let failed = db.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 4);
    assert_eq!(failed.error.as_deref(), Some("still broken"));
    assert!(failed.completed_at.is_some());

    let err = db.jobs.cancel(job.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

/// Claim and complete everything runnable through `db`.
async fn drain(db: &Database) {
    while let Some(job) = db.jobs.claim_next_for_queues(&[]).await.unwrap() {
        db.jobs.complete(job.id, None).await.unwrap();
    }
}

fn with_expired_leases(db: &Database) -> Database {
    let jobs = PgJobRepository::new(db.pool.clone())
        .with_retry_countdown(Duration::zero())
        .with_lease(Duration::zero());
    db.clone().with_jobs(jobs)
}

#[tokio::test]
#[ignore]
async fn test_abandoned_job_is_reclaimed_after_lease() {
    let _guard = SERIAL.lock().await;
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Csv, "/tmp/none.csv")
        .await
        .unwrap();
    let job = db
        .jobs
        .queue(file.id, OperationType::DataProfiling, None)
        .await
        .unwrap();

    let first = claim_job(&db, job.id).await;
    assert_eq!(first.attempts, 1);

    // The claim holds a live lease; no one else gets the job.
    if let Some(other) = db.jobs.claim_next_for_queues(&[]).await.unwrap() {
        assert_ne!(other.id, job.id);
        db.jobs.complete(other.id, None).await.unwrap();
    }

    // The worker died without completing or failing the job.
    let expired = with_expired_leases(&db);
    let reclaimed = claim_job(&expired, job.id).await;
    assert_eq!(reclaimed.status, JobStatus::Processing);
    assert_eq!(reclaimed.attempts, 2);
    assert!(reclaimed.started_at >= first.started_at);

    assert!(expired.jobs.complete(job.id, None).await.unwrap());
    let done = db.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}

#[tokio::test]
#[ignore]
async fn test_abandoned_job_fails_when_attempts_exhausted() {
    let _guard = SERIAL.lock().await;
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Csv, "/tmp/none.csv")
        .await
        .unwrap();
    let job = db
        .jobs
        .queue(file.id, OperationType::ImportEntities, None)
        .await
        .unwrap();
    assert_eq!(job.max_retries, 0);

    claim_job(&db, job.id).await;
    drain(&with_expired_leases(&db)).await;

    let failed = db.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.error.unwrap().contains("lease expired"));
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
#[ignore]
async fn test_non_retryable_operation_fails_immediately() {
    let _guard = SERIAL.lock().await;
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Csv, "/tmp/none.csv")
        .await
        .unwrap();
    let job = db
        .jobs
        .queue(file.id, OperationType::ImportEntities, None)
        .await
        .unwrap();

    claim_job(&db, job.id).await;
    let outcome = db.jobs.fail(job.id, "catalog unavailable").await.unwrap();
    assert_eq!(outcome, FailOutcome::Failed);
}

#[tokio::test]
#[ignore]
async fn test_cancelled_job_discards_result() {
    let _guard = SERIAL.lock().await;
    let db = setup().await;
    let file = insert_test_file(&db, FileKind::Json, "/tmp/none.json")
        .await
        .unwrap();
    let job = db
        .jobs
        .queue(file.id, OperationType::DataQualityCheck, None)
        .await
        .unwrap();

    claim_job(&db, job.id).await;
    db.jobs.update_progress(job.id, 40, Some("halfway")).await.unwrap();

    let cancelled = db.jobs.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    assert!(!db.jobs.complete(job.id, Some(json!({"score": 1.0}))).await.unwrap());
    assert_eq!(
        db.jobs.fail(job.id, "late error").await.unwrap(),
        FailOutcome::Discarded
    );

    let current = db.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Cancelled);
    assert!(current.result.is_none());
}

#[tokio::test]
#[ignore]
async fn test_cancel_missing_job() {
    let db = setup().await;
    let err = db.jobs.cancel(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_scan_lifecycle() {
    let db = setup().await;
    let scan = db
        .scans
        .create(CreateScanRequest {
            name: "nightly".to_string(),
            data_source: "adls-raw".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(scan.status, ScanStatus::Created);

    let err = db.scans.stop(scan.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let running = db.scans.start(scan.id).await.unwrap();
    assert_eq!(running.status, ScanStatus::Running);
    assert!(running.started_at.is_some());

    let err = db.scans.start(scan.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let stopped = db.scans.stop(scan.id).await.unwrap();
    assert_eq!(stopped.status, ScanStatus::Stopped);
    assert!(stopped.stopped_at.is_some());
}

#[tokio::test]
#[ignore]
async fn test_stop_missing_scan_is_not_found() {
    let db = setup().await;
    let err = db.scans.stop(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(err.to_string().contains("not found"));
}
