//! Shared application state and background service lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pvw_core::{defaults, EventBus, UploadConfig};
use pvw_db::Database;
use pvw_jobs::{
    bridge_to_bus, handlers_from_env, listen_for_job_events, RetentionSweeper, WorkerBuilder,
    WorkerHandle,
};

use crate::config::ServerConfig;
use crate::rate_limit::{build_limiter, ClientRateLimiter};
use crate::ws::WebSocketManager;

/// How long `shutdown` waits for in-flight jobs.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Event bus feeding the WebSocket fan-out.
    pub event_bus: Arc<EventBus>,
    pub ws: Arc<WebSocketManager>,
    pub uploads: Arc<UploadConfig>,
    /// Per-client rate limiter (None if rate limiting is disabled).
    pub rate_limiter: Option<Arc<ClientRateLimiter>>,
    services: Arc<Mutex<Services>>,
}

#[derive(Default)]
struct Services {
    worker: Option<WorkerHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Build state without starting any background task.
    pub fn new(db: Database, config: &ServerConfig) -> Self {
        let rate_limiter = if config.rate_limit_enabled {
            let limiter = build_limiter(config.rate_limit_requests, config.rate_limit_period);
            if limiter.is_none() {
                warn!("Rate limit requests and period must be non-zero; rate limiting disabled");
            }
            limiter.map(Arc::new)
        } else {
            None
        };

        Self {
            db,
            event_bus: Arc::new(EventBus::new(defaults::EVENT_BUS_CAPACITY)),
            ws: Arc::new(WebSocketManager::new(config.ws.clone())),
            uploads: Arc::new(config.uploads.clone()),
            rate_limiter,
            services: Arc::new(Mutex::new(Services::default())),
        }
    }

    /// Build state and start the background services: WebSocket fan-out and
    /// heartbeat monitor, then either the in-process worker with the
    /// retention sweep or the listener for events from external workers.
    pub async fn init(db: Database, config: &ServerConfig) -> Self {
        let state = Self::new(db, config);
        state.start(config).await;
        state
    }

    async fn start(&self, config: &ServerConfig) {
        let mut services = self.services.lock().await;
        services.tasks.push(self.ws.spawn_fanout(&self.event_bus));
        services.tasks.push(self.ws.spawn_monitor());

        if config.run_worker {
            info!("Starting in-process job worker...");
            let worker = WorkerBuilder::new(self.db.clone())
                .with_config(config.worker.clone().with_enabled(true))
                .with_handlers(handlers_from_env())
                .build()
                .await;
            let handle = worker.start();
            services
                .tasks
                .push(tokio::spawn(bridge_to_bus(handle.events(), self.event_bus.clone())));
            services.tasks.push(
                RetentionSweeper::new(self.db.clone(), config.retention.clone()).spawn(),
            );
            services.worker = Some(handle);
            info!("Job worker started");
        } else {
            info!("Job worker runs out of process; relaying its events");
            services.tasks.push(tokio::spawn(listen_for_job_events(
                self.db.pool.clone(),
                self.event_bus.clone(),
            )));
        }
    }

    /// Stop the worker and background tasks and close WebSocket connections.
    pub async fn shutdown(&self) {
        let mut services = self.services.lock().await;
        if let Some(worker) = services.worker.take() {
            match worker.shutdown_and_wait(WORKER_SHUTDOWN_GRACE).await {
                Ok(true) => info!("Job worker stopped"),
                Ok(false) => warn!(
                    grace_secs = WORKER_SHUTDOWN_GRACE.as_secs(),
                    "Job worker still busy at shutdown; unfinished jobs will be reclaimed"
                ),
                Err(e) => warn!(error = %e, "Failed to signal job worker shutdown"),
            }
        }
        for task in services.tasks.drain(..) {
            task.abort();
        }
        self.ws.close_all().await;
        info!("Background services stopped");
    }
}
