//! End-to-end worker tests against PostgreSQL.
//!
//! Require `DATABASE_URL`; run with `cargo test -p pvw-jobs -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use pvw_client::mock::MockCatalog;
use pvw_client::CatalogApi;
use pvw_db::test_fixtures::{connect_test_database, insert_test_file};
use pvw_db::Database;
use pvw_jobs::{
    default_handlers, FileKind, FileRepository, FileStatus, JobRepository, JobStatus,
    OperationType, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle,
};
use tokio::sync::broadcast;
use uuid::Uuid;

static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn start_worker(db: &Database) -> WorkerHandle {
    start_worker_with_catalog(db, None).await
}

async fn start_worker_with_catalog(
    db: &Database,
    catalog: Option<Arc<dyn CatalogApi>>,
) -> WorkerHandle {
    WorkerBuilder::new(db.clone())
        .with_config(WorkerConfig::default().with_poll_interval(50))
        .with_handlers(default_handlers(catalog, 10))
        .build()
        .await
        .start()
}

async fn stop(handle: WorkerHandle) {
    let stopped = handle
        .shutdown_and_wait(Duration::from_secs(10))
        .await
        .unwrap();
    assert!(stopped, "worker did not stop in time");
}

/// Wait for the terminal event of `job_id`.
async fn wait_for_terminal(
    mut events: broadcast::Receiver<WorkerEvent>,
    job_id: Uuid,
) -> WorkerEvent {
    let wait = async {
        loop {
            let event = events.recv().await.expect("worker event channel failed");
            let id = match &event {
                WorkerEvent::JobCompleted { job_id, .. } | WorkerEvent::JobFailed { job_id, .. } => {
                    *job_id
                }
                _ => continue,
            };
            if id == job_id {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .expect("job did not finish in time")
}

#[tokio::test]
#[ignore]
async fn test_worker_profiles_uploaded_csv() {
    let _guard = SERIAL.lock().await;
    let db = connect_test_database().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "name,age\nann,31\nbob,42\ncy,\n").unwrap();
    let file = insert_test_file(&db, FileKind::Csv, path.to_str().unwrap())
        .await
        .unwrap();

    let handle = start_worker(&db).await;
    let terminal = handle.events();
    let mut events = handle.events();
    let job = db
        .jobs
        .queue(file.id, OperationType::DataProfiling, None)
        .await
        .unwrap();

    let event = wait_for_terminal(terminal, job.id).await;
    assert!(matches!(event, WorkerEvent::JobCompleted { .. }));

    let stored = db.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    let result = stored.result.unwrap();
    assert_eq!(result["row_count"], 3);

    let file = db.files.get(file.id).await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Processed);

    // Progress events arrive for our job before completion.
    let mut saw_progress = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, WorkerEvent::JobProgress { job_id, .. } if job_id == job.id) {
            saw_progress = true;
        }
    }
    assert!(saw_progress);

    stop(handle).await;
}

#[tokio::test]
#[ignore]
async fn test_catalog_job_without_client_fails_without_retry() {
    let _guard = SERIAL.lock().await;
    let db = connect_test_database().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entities.csv");
    std::fs::write(&path, "qualified_name,name\nds://a,a\n").unwrap();
    let file = insert_test_file(&db, FileKind::Csv, path.to_str().unwrap())
        .await
        .unwrap();

    let handle = start_worker(&db).await;
    let terminal = handle.events();
    let job = db
        .jobs
        .queue(file.id, OperationType::ImportEntities, None)
        .await
        .unwrap();

    let event = wait_for_terminal(terminal, job.id).await;
    let WorkerEvent::JobFailed { will_retry, error, .. } = event else {
        panic!("expected job_failed");
    };
    assert!(!will_retry);
    assert!(error.contains("not configured"));

    let stored = db.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    let file = db.files.get(file.id).await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Failed);

    stop(handle).await;
}

#[tokio::test]
#[ignore]
async fn test_import_entities_completes_with_row_error() {
    let _guard = SERIAL.lock().await;
    let db = connect_test_database().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tables.csv");
    std::fs::write(
        &path,
        "qualified_name,name,description\n\
         mssql://srv/db/dbo/orders,orders,Order facts\n\
         mssql://srv/db/dbo/unnamed,,No name here\n\
         mssql://srv/db/dbo/customers,customers,\n",
    )
    .unwrap();
    let file = insert_test_file(&db, FileKind::Csv, path.to_str().unwrap())
        .await
        .unwrap();

    let catalog = MockCatalog::new();
    let handle =
        start_worker_with_catalog(&db, Some(Arc::new(catalog.clone()) as Arc<dyn CatalogApi>))
            .await;
    let terminal = handle.events();
    let job = db
        .jobs
        .queue(file.id, OperationType::ImportEntities, None)
        .await
        .unwrap();

    let event = wait_for_terminal(terminal, job.id).await;
    assert!(matches!(event, WorkerEvent::JobCompleted { .. }));

    let stored = db.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert!(stored.error.is_none());
    let result = stored.result.unwrap();
    assert_eq!(result["total_rows"], 3);
    assert_eq!(result["entities_created"], 2);
    assert_eq!(result["entities_failed"], 1);
    let errors = result["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("Row 2"));
    assert!(errors[0].as_str().unwrap().contains("name"));

    assert_eq!(catalog.created_entities().len(), 2);
    let file = db.files.get(file.id).await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Processed);

    stop(handle).await;
}
