//! Job worker pulling processing jobs off the named queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use pvw_core::{
    defaults, FailOutcome, FileRepository, FileStatus, JobRepository, OperationType,
    ProcessingJob, QueueName, Result, ServerEvent,
};
use pvw_db::Database;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Queues this worker claims from.
    pub queues: Vec<QueueName>,
    /// Per-job execution timeout in seconds.
    pub job_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            queues: vec![QueueName::FileProcessing, QueueName::DataOperations],
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `1000` | Polling interval when queues are empty |
    /// | `JOB_QUEUES` | `file_processing,data_operations` | Queues to claim from |
    /// | `JOB_TIMEOUT_SECS` | `1800` | Per-job timeout |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.max_concurrent_jobs)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.poll_interval_ms);

        let queues = std::env::var("JOB_QUEUES")
            .ok()
            .map(|v| parse_queues(&v))
            .filter(|q| !q.is_empty())
            .unwrap_or(defaults.queues);

        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.job_timeout_secs);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            queues,
            job_timeout_secs,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Restrict the worker to `queues`.
    pub fn with_queues(mut self, queues: Vec<QueueName>) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Claim lease: the job timeout plus [`defaults::JOB_LEASE_GRACE_SECS`].
    pub fn lease(&self) -> chrono::Duration {
        let secs = self
            .job_timeout_secs
            .saturating_add(defaults::JOB_LEASE_GRACE_SECS)
            .min(i64::MAX as u64);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Comma-separated queue names; unknown names are logged and skipped.
fn parse_queues(value: &str) -> Vec<QueueName> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<QueueName>() {
            Ok(q) => Some(q),
            Err(e) => {
                warn!(queue = s, error = %e, "Ignoring unknown queue in JOB_QUEUES");
                None
            }
        })
        .collect()
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A job was claimed and started.
    JobStarted {
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        attempt: i32,
    },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        file_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        duration_ms: u64,
    },
    /// An attempt failed; `will_retry` when a retry was scheduled.
    JobFailed {
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        error: String,
        will_retry: bool,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

impl WorkerEvent {
    /// The client-facing event, if this one is broadcast to subscribers.
    pub fn to_server_event(&self) -> Option<ServerEvent> {
        let event = match self.clone() {
            WorkerEvent::JobStarted {
                job_id,
                file_id,
                operation_type,
                attempt,
            } => ServerEvent::JobStarted {
                job_id,
                file_id,
                operation_type,
                attempt,
            },
            WorkerEvent::JobProgress {
                job_id,
                file_id,
                percent,
                message,
            } => ServerEvent::JobProgress {
                job_id,
                file_id,
                progress: percent,
                message,
            },
            WorkerEvent::JobCompleted {
                job_id,
                file_id,
                operation_type,
                duration_ms,
            } => ServerEvent::JobCompleted {
                job_id,
                file_id,
                operation_type,
                duration_ms: Some(duration_ms as i64),
            },
            WorkerEvent::JobFailed {
                job_id,
                file_id,
                operation_type,
                error,
                will_retry,
            } => ServerEvent::JobFailed {
                job_id,
                file_id,
                operation_type,
                error,
                will_retry,
            },
            WorkerEvent::WorkerStarted | WorkerEvent::WorkerStopped => return None,
        };
        Some(event)
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| pvw_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Signal shutdown and wait up to `timeout` for in-flight jobs to finish.
    ///
    /// Returns `Ok(false)` if the worker was still running at the deadline.
    pub async fn shutdown_and_wait(&self, timeout: Duration) -> Result<bool> {
        let mut events = self.events();
        self.shutdown().await?;
        let stopped = async {
            loop {
                match events.recv().await {
                    Ok(WorkerEvent::WorkerStopped) | Err(broadcast::error::RecvError::Closed) => {
                        break
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        };
        Ok(tokio::time::timeout(timeout, stopped).await.is_ok())
    }
}

type HandlerMap = Arc<RwLock<HashMap<OperationType, Arc<dyn JobHandler>>>>;

/// Job worker that processes jobs from the queues.
pub struct JobWorker {
    db: Database,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(db: Database, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            db,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Sleeps only when every queue is empty, waking early when
    /// a job is queued in this process.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            queues = ?self.config.queues,
            "Job worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs;
        let job_notify = self.db.jobs.job_notify();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = job_notify.notified() => {
                        debug!("Woken by newly queued job");
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Claim the next runnable job without processing it.
    async fn claim_job(&self) -> Option<ProcessingJob> {
        match self
            .db
            .jobs
            .claim_next_for_queues(&self.config.queues)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }

    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            db: self.db.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            job_timeout: Duration::from_secs(self.config.job_timeout_secs),
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }
}

/// Reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    db: Database,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
}

impl JobWorkerRef {
    /// Execute a single claimed job.
    async fn execute_job(self, job: ProcessingJob) {
        let start = Instant::now();
        let job_id = job.id;
        let file_id = job.file_id;
        let operation_type = job.operation_type;

        info!(
            subsystem = "jobs",
            component = "worker",
            %job_id,
            %file_id,
            %operation_type,
            attempt = job.attempts,
            "Processing job"
        );

        let file = match self.db.files.get(file_id).await {
            Ok(Some(file)) if file.status != FileStatus::Deleted => file,
            Ok(_) => {
                let error = format!("File {} not found", file_id);
                self.record_failure(job_id, file_id, operation_type, error, start)
                    .await;
                return;
            }
            Err(e) => {
                self.record_failure(job_id, file_id, operation_type, e.to_string(), start)
                    .await;
                return;
            }
        };

        self.set_file_status(file_id, FileStatus::Processing).await;
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            file_id,
            operation_type,
            attempt: job.attempts,
        });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&operation_type).cloned()
        };

        let result = match handler {
            Some(handler) => {
                // Progress is persisted in order by a forwarder task; the
                // callback itself must stay synchronous.
                let (progress_tx, progress_rx) = mpsc::unbounded_channel();
                let forwarder = tokio::spawn(forward_progress(
                    progress_rx,
                    self.db.clone(),
                    self.event_tx.clone(),
                    job_id,
                    file_id,
                ));

                let ctx = JobContext::new(job, file).with_progress_callback(move |percent, message| {
                    let _ = progress_tx.send((percent, message.map(String::from)));
                });

                let result = match tokio::time::timeout(self.job_timeout, handler.execute(ctx)).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            %job_id,
                            %operation_type,
                            timeout_secs = self.job_timeout.as_secs(),
                            "Job exceeded timeout"
                        );
                        JobResult::Failed(format!(
                            "Job exceeded timeout of {}s",
                            self.job_timeout.as_secs()
                        ))
                    }
                };
                if let Err(e) = forwarder.await {
                    error!(error = ?e, %job_id, "Progress forwarder panicked");
                }
                result
            }
            None => {
                warn!(%operation_type, "No handler registered for operation");
                JobResult::Failed(format!("No handler for operation: {}", operation_type))
            }
        };

        match result {
            JobResult::Success(result_data) => match self.db.jobs.complete(job_id, result_data).await
            {
                Ok(true) => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    self.set_file_status(file_id, FileStatus::Processed).await;
                    info!(
                        subsystem = "jobs",
                        component = "worker",
                        %job_id,
                        %operation_type,
                        duration_ms,
                        "Job completed successfully"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                        job_id,
                        file_id,
                        operation_type,
                        duration_ms,
                    });
                }
                Ok(false) => {
                    info!(%job_id, "Job was cancelled while running, result discarded");
                }
                Err(e) => {
                    error!(error = ?e, %job_id, "Failed to mark job as completed");
                }
            },
            JobResult::Failed(error) | JobResult::Retry(error) => {
                self.record_failure(job_id, file_id, operation_type, error, start)
                    .await;
            }
        }
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        error: String,
        start: Instant,
    ) {
        let duration_ms = start.elapsed().as_millis() as u64;
        let will_retry = match self.db.jobs.fail(job_id, &error).await {
            Ok(FailOutcome::RetryScheduled { attempt, retry_at }) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    %job_id,
                    %operation_type,
                    %error,
                    attempt,
                    %retry_at,
                    duration_ms,
                    "Job attempt failed, retry scheduled"
                );
                true
            }
            Ok(FailOutcome::Failed) => {
                self.set_file_status(file_id, FileStatus::Failed).await;
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    %job_id,
                    %operation_type,
                    %error,
                    duration_ms,
                    "Job failed"
                );
                false
            }
            Ok(FailOutcome::Discarded) => {
                info!(%job_id, %error, "Job was cancelled while running, failure discarded");
                return;
            }
            Err(e) => {
                error!(error = ?e, %job_id, "Failed to mark job as failed");
                return;
            }
        };

        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            file_id,
            operation_type,
            error,
            will_retry,
        });
    }

    async fn set_file_status(&self, file_id: Uuid, status: FileStatus) {
        if let Err(e) = self.db.files.update_status(file_id, status).await {
            warn!(error = %e, %file_id, %status, "Failed to update file status");
        }
    }
}

/// Persist and broadcast progress updates in the order they were reported.
async fn forward_progress(
    mut rx: mpsc::UnboundedReceiver<(i32, Option<String>)>,
    db: Database,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_id: Uuid,
    file_id: Uuid,
) {
    while let Some((percent, message)) = rx.recv().await {
        if let Err(e) = db
            .jobs
            .update_progress(job_id, percent, message.as_deref())
            .await
        {
            warn!(error = %e, %job_id, "Failed to record job progress");
        }
        let _ = event_tx.send(WorkerEvent::JobProgress {
            job_id,
            file_id,
            percent,
            message,
        });
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    db: Database,
    config: WorkerConfig,
    handlers: Vec<Box<dyn JobHandler>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add several boxed handlers.
    pub fn with_handlers(mut self, handlers: Vec<Box<dyn JobHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Build and return the worker.
    ///
    /// Claims are leased for the job timeout plus a grace period, so a job
    /// left `processing` by a worker that died is picked up again.
    pub async fn build(self) -> JobWorker {
        let lease = self.config.lease();
        let jobs = self.db.jobs.clone().with_lease(lease);
        let worker = JobWorker::new(self.db.with_jobs(jobs), self.config);

        {
            let mut handlers = worker.handlers.write().await;
            for handler in self.handlers {
                let operation_type = handler.operation_type();
                handlers.insert(operation_type, Arc::from(handler));
                debug!(%operation_type, "Registered job handler");
            }
        }

        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert!(config.enabled);
        assert_eq!(
            config.queues,
            vec![QueueName::FileProcessing, QueueName::DataOperations]
        );
        assert_eq!(config.job_timeout_secs, defaults::JOB_TIMEOUT_SECS);
    }

    #[test]
    fn test_lease_outlives_job_timeout() {
        let config = WorkerConfig::default().with_timeout(60);
        assert_eq!(
            config.lease(),
            chrono::Duration::seconds(60 + defaults::JOB_LEASE_GRACE_SECS as i64)
        );
        assert!(WorkerConfig::default().with_timeout(u64::MAX).lease() > chrono::Duration::zero());
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(100)
            .with_max_concurrent(8)
            .with_enabled(false)
            .with_queues(vec![QueueName::DataOperations])
            .with_timeout(5);

        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert!(!config.enabled);
        assert_eq!(config.queues, vec![QueueName::DataOperations]);
        assert_eq!(config.job_timeout_secs, 5);
    }

    #[test]
    fn test_with_max_concurrent_floor() {
        let config = WorkerConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_parse_queues() {
        assert_eq!(
            parse_queues("file_processing, data_operations"),
            vec![QueueName::FileProcessing, QueueName::DataOperations]
        );
        assert_eq!(parse_queues("bogus,maintenance,"), vec![QueueName::Maintenance]);
        assert!(parse_queues("").is_empty());
    }

    #[test]
    fn test_worker_event_to_server_event() {
        let job_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();

        let event = WorkerEvent::JobProgress {
            job_id,
            file_id,
            percent: 40,
            message: Some("Parsing".into()),
        };
        assert_eq!(
            event.to_server_event(),
            Some(ServerEvent::JobProgress {
                job_id,
                file_id,
                progress: 40,
                message: Some("Parsing".into()),
            })
        );

        let event = WorkerEvent::JobCompleted {
            job_id,
            file_id,
            operation_type: OperationType::DataProfiling,
            duration_ms: 12,
        };
        assert_eq!(
            event.to_server_event(),
            Some(ServerEvent::JobCompleted {
                job_id,
                file_id,
                operation_type: OperationType::DataProfiling,
                duration_ms: Some(12),
            })
        );
    }

    #[test]
    fn test_worker_lifecycle_events_are_not_broadcast() {
        assert!(WorkerEvent::WorkerStarted.to_server_event().is_none());
        assert!(WorkerEvent::WorkerStopped.to_server_event().is_none());
    }

    #[test]
    fn test_failed_event_keeps_retry_flag() {
        let event = WorkerEvent::JobFailed {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            operation_type: OperationType::MetadataExtraction,
            error: "boom".into(),
            will_retry: true,
        };
        let Some(ServerEvent::JobFailed {
            will_retry, error, ..
        }) = event.to_server_event()
        else {
            panic!("expected job_failed");
        };
        assert!(will_retry);
        assert_eq!(error, "boom");
    }
}
