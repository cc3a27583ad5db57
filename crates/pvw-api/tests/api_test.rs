//! End-to-end API tests against PostgreSQL.
//!
//! Run with `cargo test -p pvw-api -- --ignored` and `DATABASE_URL` pointing
//! at a disposable database.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use pvw_api::{build_router, AppState, ServerConfig};
use pvw_core::UploadConfig;
use pvw_db::test_fixtures::connect_test_database;

struct TestApp {
    router: Router,
    _uploads: TempDir,
}

async fn test_app() -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let config = ServerConfig::default()
        .without_rate_limit()
        .with_uploads(UploadConfig::default().with_upload_dir(uploads.path()));
    let db = connect_test_database()
        .await
        .expect("Failed to connect to test DB");
    let state = AppState::new(db, &config);
    TestApp {
        router: build_router(state, &config),
        _uploads: uploads,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn upload(&self, filename: &str, content: &[u8]) -> (StatusCode, Value) {
        let boundary = "pvw-api-test";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        self.send(
            Request::builder()
                .method("POST")
                .uri("/api/v1/upload")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

const PEOPLE_CSV: &[u8] = b"name,email,age\nAlice,alice@example.com,30\nBob,bob@example.com,41\n";

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_upload_process_cancel_flow() {
    let app = test_app().await;

    let (status, file) = app.upload("people.csv", PEOPLE_CSV).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(file["filename"], "people.csv");
    assert_eq!(file["kind"], "csv");
    assert_eq!(file["status"], "uploaded");
    assert_eq!(file["size_bytes"], PEOPLE_CSV.len());
    let file_id = file["id"].as_str().unwrap().to_string();
    let stored_path = file["stored_path"].as_str().unwrap().to_string();
    assert!(std::path::Path::new(&stored_path).exists());

    let (status, fetched) = app.get(&format!("/api/v1/upload/files/{}", file_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], file_id.as_str());

    let (status, queued) = app
        .post(
            &format!("/api/v1/upload/files/{}/process", file_id),
            json!({"operation_type": "data_profiling"}),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(queued["queue"], "file_processing");
    assert_eq!(queued["status"], "queued");
    let job_id = queued["job_id"].as_str().unwrap().to_string();

    let (status, job) = app.get(&format!("/api/v1/upload/jobs/{}", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["operation_type"], "data_profiling");
    assert_eq!(job["progress"], 0);

    let (status, jobs) = app
        .get(&format!("/api/v1/upload/jobs?file_id={}&status=queued", file_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);

    let cancel_uri = format!("/api/v1/upload/jobs/{}/cancel", job_id);
    let (status, cancelled) = app.post(&cancel_uri, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = app.post(&cancel_uri, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.delete(&format!("/api/v1/upload/files/{}", file_id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!std::path::Path::new(&stored_path).exists());

    let (status, body) = app.get(&format!("/api/v1/upload/files/{}", file_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    // A deleted file can no longer be processed.
    let (status, _) = app
        .post(
            &format!("/api/v1/upload/files/{}/process", file_id),
            json!({"operation_type": "metadata_extraction"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_upload_accepts_text_with_signature_like_prefix() {
    let app = test_app().await;

    let (status, file) = app.upload("health.csv", b"BMI,weight\n22.5,70\n").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(file["mime_type"], "text/csv");

    let (status, _) = app.upload("codes.txt", b"MZ-1001 Mazda part\n").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.upload("logo.csv", b"\x89PNG\r\n\x1a\n\x00\x00").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Binary content"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_process_routes_data_operations_queue() {
    let app = test_app().await;
    let (_, file) = app.upload("entities.csv", PEOPLE_CSV).await;
    let file_id = file["id"].as_str().unwrap();

    let (status, queued) = app
        .post(
            &format!("/api/v1/upload/files/{}/process", file_id),
            json!({"operation_type": "import_entities", "options": {"entity_type": "azure_sql_table"}}),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(queued["queue"], "data_operations");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_unknown_ids_return_404() {
    let app = test_app().await;
    let missing = Uuid::new_v4();

    let (status, body) = app.get(&format!("/api/v1/upload/jobs/{}", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], format!("Job {} not found", missing));

    let (status, _) = app
        .post(&format!("/api/v1/upload/jobs/{}/cancel", missing), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post(
            &format!("/api/v1/upload/files/{}/process", missing),
            json!({"operation_type": "data_profiling"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete(&format!("/api/v1/upload/files/{}", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_scan_lifecycle() {
    let app = test_app().await;
    let name = format!("nightly-{}", Uuid::new_v4());

    let (status, scan) = app
        .post(
            "/api/v1/scanning",
            json!({"name": name, "data_source": "adls-raw"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(scan["status"], "created");
    let scan_id = scan["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(&format!("/api/v1/scanning/{}/stop", scan_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, started) = app
        .post(&format!("/api/v1/scanning/{}/start", scan_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "running");

    let (status, _) = app
        .post(&format!("/api/v1/scanning/{}/start", scan_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, stopped) = app
        .post(&format!("/api/v1/scanning/{}/stop", scan_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "stopped");

    let (status, summary) = app
        .get(&format!("/api/v1/scanning/{}/status", scan_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["scan_id"], scan_id.as_str());
    assert_eq!(summary["status"], "stopped");
    assert!(summary["started_at"].is_string());
    assert!(summary["stopped_at"].is_string());

    let (status, scans) = app.get("/api/v1/scanning?limit=500").await;
    assert_eq!(status, StatusCode::OK);
    assert!(scans
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["id"] == scan_id.as_str()));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_stop_unknown_scan_is_not_found() {
    let app = test_app().await;
    let (status, body) = app
        .post(
            &format!("/api/v1/scanning/{}/stop", Uuid::new_v4()),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_queue_stats() {
    let app = test_app().await;
    let (status, stats) = app.get("/api/v1/system/queues").await;
    assert_eq!(status, StatusCode::OK);
    for key in ["queued", "processing", "completed", "failed", "cancelled", "total"] {
        assert!(stats[key].is_i64(), "missing {key}");
    }
}
