//! # pvw-api
//!
//! HTTP and WebSocket API for the pvw file-processing pipeline: uploads,
//! processing jobs, scans, system status, and the real-time event stream.

pub mod config;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod services;
pub mod state;
pub mod ws;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

use handlers::{jobs, scanning, system, uploads};
use rate_limit::rate_limit_middleware;
use ws::ws_handler;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Build the application router with its middleware stack.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(system::health_check))
        // Uploads and processing
        .route("/api/v1/upload", post(uploads::upload_file))
        .route("/api/v1/upload/files", get(uploads::list_files))
        .route(
            "/api/v1/upload/files/:file_id",
            get(uploads::get_file).delete(uploads::delete_file),
        )
        .route(
            "/api/v1/upload/files/:file_id/process",
            post(uploads::process_file),
        )
        .route("/api/v1/upload/jobs", get(jobs::list_jobs))
        .route("/api/v1/upload/jobs/:job_id", get(jobs::get_job))
        .route("/api/v1/upload/jobs/:job_id/cancel", post(jobs::cancel_job))
        // Scanning
        .route(
            "/api/v1/scanning",
            post(scanning::create_scan).get(scanning::list_scans),
        )
        .route("/api/v1/scanning/:scan_id", get(scanning::get_scan))
        .route("/api/v1/scanning/:scan_id/start", post(scanning::start_scan))
        .route("/api/v1/scanning/:scan_id/stop", post(scanning::stop_scan))
        .route("/api/v1/scanning/:scan_id/status", get(scanning::scan_status))
        // System
        .route("/api/v1/system/queues", get(system::queue_status))
        .route("/api/v1/system/websocket", get(system::websocket_status))
        // Real-time events
        .route("/api/v1/ws", get(ws_handler))
        // Middleware
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors_layer(&config.allowed_origins))
        .layer(CatchPanicLayer::new())
        // Uploads are bounded per kind by the upload validator; this caps the
        // whole request body.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
}
