//! Server event types, envelope schema, and event bus for real-time notifications.
//!
//! Events from the API (uploads, scans) and the job worker (lifecycle and
//! progress) are wrapped in an [`EventEnvelope`] and broadcast on a single
//! channel. The WebSocket manager subscribes and fans each envelope out to the
//! topics returned by [`ServerEvent::topics`].
//!
//! Envelopes are also serialized onto a PostgreSQL `NOTIFY` channel when the
//! worker runs in a separate process, so both `Serialize` and `Deserialize`
//! are derived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{OperationType, QueueName};

// ============================================================================
// Event Envelope
// ============================================================================

/// Versioned envelope around a domain event.
///
/// ```text
/// {"event_id":"...","event_type":"job_progress","occurred_at":"...",
///  "entity_type":"job","entity_id":"...","payload":{"type":"job_progress",...}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Event name, identical to the payload's `type` tag.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Type of entity this event relates to (`"job"`, `"file"`, `"scan"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// ID of the entity this event relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: ServerEvent,
}

impl EventEnvelope {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event_id: crate::new_v7(),
            event_type: event.event_type().to_string(),
            occurred_at: Utc::now(),
            entity_type: event.entity_type().map(String::from),
            entity_id: event.entity_id().map(|id| id.to_string()),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Server Event (domain payloads)
// ============================================================================

/// Domain events broadcast to WebSocket subscribers.
///
/// Serialized with a snake_case `type` tag, e.g.
/// `{"type":"job_started","job_id":"...","file_id":"...","operation_type":"data_profiling","attempt":1}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A job was added to its queue.
    JobQueued {
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        queue: QueueName,
    },
    /// A worker claimed the job.
    JobStarted {
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        attempt: i32,
    },
    /// Job progress update (0-100).
    JobProgress {
        job_id: Uuid,
        file_id: Uuid,
        progress: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<i64>,
    },
    /// An attempt failed. `will_retry` is set when a retry was scheduled.
    JobFailed {
        job_id: Uuid,
        file_id: Uuid,
        operation_type: OperationType,
        error: String,
        will_retry: bool,
    },
    /// The job was cancelled through the API.
    JobCancelled { job_id: Uuid, file_id: Uuid },
    /// A file was accepted by the upload handler.
    FileUploaded {
        file_id: Uuid,
        filename: String,
        size_bytes: i64,
    },
    ScanCreated { scan_id: Uuid, name: String },
    ScanStarted { scan_id: Uuid },
    ScanStopped { scan_id: Uuid },
}

impl ServerEvent {
    /// Event name (matches the serialized `type` tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::JobQueued { .. } => "job_queued",
            ServerEvent::JobStarted { .. } => "job_started",
            ServerEvent::JobProgress { .. } => "job_progress",
            ServerEvent::JobCompleted { .. } => "job_completed",
            ServerEvent::JobFailed { .. } => "job_failed",
            ServerEvent::JobCancelled { .. } => "job_cancelled",
            ServerEvent::FileUploaded { .. } => "file_uploaded",
            ServerEvent::ScanCreated { .. } => "scan_created",
            ServerEvent::ScanStarted { .. } => "scan_started",
            ServerEvent::ScanStopped { .. } => "scan_stopped",
        }
    }

    /// Returns the entity type this event relates to.
    pub fn entity_type(&self) -> Option<&'static str> {
        match self {
            ServerEvent::JobQueued { .. }
            | ServerEvent::JobStarted { .. }
            | ServerEvent::JobProgress { .. }
            | ServerEvent::JobCompleted { .. }
            | ServerEvent::JobFailed { .. }
            | ServerEvent::JobCancelled { .. } => Some("job"),
            ServerEvent::FileUploaded { .. } => Some("file"),
            ServerEvent::ScanCreated { .. }
            | ServerEvent::ScanStarted { .. }
            | ServerEvent::ScanStopped { .. } => Some("scan"),
        }
    }

    /// Returns the primary entity ID this event relates to.
    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            ServerEvent::JobQueued { job_id, .. }
            | ServerEvent::JobStarted { job_id, .. }
            | ServerEvent::JobProgress { job_id, .. }
            | ServerEvent::JobCompleted { job_id, .. }
            | ServerEvent::JobFailed { job_id, .. }
            | ServerEvent::JobCancelled { job_id, .. } => Some(*job_id),
            ServerEvent::FileUploaded { file_id, .. } => Some(*file_id),
            ServerEvent::ScanCreated { scan_id, .. }
            | ServerEvent::ScanStarted { scan_id }
            | ServerEvent::ScanStopped { scan_id } => Some(*scan_id),
        }
    }

    /// WebSocket topics this event is delivered to.
    ///
    /// Job events go to `jobs`, `jobs:<job_id>` and `files:<file_id>`;
    /// file events to `files` and `files:<file_id>`; scan events to `scans`
    /// and `scans:<scan_id>`.
    pub fn topics(&self) -> Vec<String> {
        match self {
            ServerEvent::JobQueued {
                job_id, file_id, ..
            }
            | ServerEvent::JobStarted {
                job_id, file_id, ..
            }
            | ServerEvent::JobProgress {
                job_id, file_id, ..
            }
            | ServerEvent::JobCompleted {
                job_id, file_id, ..
            }
            | ServerEvent::JobFailed {
                job_id, file_id, ..
            }
            | ServerEvent::JobCancelled { job_id, file_id } => vec![
                "jobs".to_string(),
                format!("jobs:{}", job_id),
                format!("files:{}", file_id),
            ],
            ServerEvent::FileUploaded { file_id, .. } => {
                vec!["files".to_string(), format!("files:{}", file_id)]
            }
            ServerEvent::ScanCreated { scan_id, .. }
            | ServerEvent::ScanStarted { scan_id }
            | ServerEvent::ScanStopped { scan_id } => {
                vec!["scans".to_string(), format!("scans:{}", scan_id)]
            }
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for distributing server events to multiple consumers.
///
/// Slow receivers that fall behind get `Lagged` and miss events.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Wrap an event in an envelope and send it to all subscribers.
    ///
    /// If there are no active subscribers the event is dropped.
    pub fn emit(&self, event: ServerEvent) {
        self.emit_envelope(EventEnvelope::new(event));
    }

    /// Re-broadcast an envelope produced elsewhere (e.g. relayed from another
    /// process) without changing its identity.
    pub fn emit_envelope(&self, envelope: EventEnvelope) {
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_event(job_id: Uuid, file_id: Uuid) -> ServerEvent {
        ServerEvent::JobProgress {
            job_id,
            file_id,
            progress: 40,
            message: Some("Parsing rows".to_string()),
        }
    }

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(progress_event(job_id, Uuid::new_v4()));

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "job_progress");
        assert_eq!(envelope.payload_version, 1);
        assert_eq!(envelope.entity_type.as_deref(), Some("job"));
        assert_eq!(envelope.entity_id, Some(job_id.to_string()));
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(ServerEvent::ScanStarted {
            scan_id: Uuid::nil(),
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_id, e2.event_id);
        assert_eq!(e1.event_type, "scan_started");
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(8);
        bus.emit(ServerEvent::ScanStopped {
            scan_id: Uuid::nil(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_envelope_preserves_identity() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let original = EventEnvelope::new(ServerEvent::JobCancelled {
            job_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
        });

        bus.emit_envelope(original.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, original.event_id);
        assert_eq!(received.payload, original.payload);
    }

    #[test]
    fn test_server_event_json_tag_is_snake_case() {
        let event = ServerEvent::JobStarted {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            operation_type: OperationType::DataProfiling,
            attempt: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_started");
        assert_eq!(json["operation_type"], "data_profiling");
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let events = vec![
            ServerEvent::JobQueued {
                job_id: Uuid::nil(),
                file_id: Uuid::nil(),
                operation_type: OperationType::ImportEntities,
                queue: QueueName::DataOperations,
            },
            ServerEvent::JobFailed {
                job_id: Uuid::nil(),
                file_id: Uuid::nil(),
                operation_type: OperationType::MetadataExtraction,
                error: "boom".to_string(),
                will_retry: true,
            },
            ServerEvent::FileUploaded {
                file_id: Uuid::nil(),
                filename: "a.csv".to_string(),
                size_bytes: 3,
            },
            ServerEvent::ScanCreated {
                scan_id: Uuid::nil(),
                name: "nightly".to_string(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn test_progress_message_omitted_when_none() {
        let event = ServerEvent::JobProgress {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            progress: 10,
            message: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_envelope_json_round_trip() {
        let envelope = EventEnvelope::new(progress_event(Uuid::new_v4(), Uuid::new_v4()));
        let text = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.event_id, envelope.event_id);
        assert_eq!(parsed.payload, envelope.payload);
    }

    #[test]
    fn test_job_event_topics() {
        let job_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let topics = progress_event(job_id, file_id).topics();
        assert_eq!(
            topics,
            vec![
                "jobs".to_string(),
                format!("jobs:{}", job_id),
                format!("files:{}", file_id)
            ]
        );
    }

    #[test]
    fn test_scan_event_topics() {
        let scan_id = Uuid::new_v4();
        let topics = ServerEvent::ScanStopped { scan_id }.topics();
        assert_eq!(topics, vec!["scans".to_string(), format!("scans:{}", scan_id)]);
    }
}
