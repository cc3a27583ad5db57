//! Forward worker events to WebSocket subscribers.
//!
//! In-process, [`bridge_to_bus`] converts [`WorkerEvent`]s into
//! [`ServerEvent`]s on the shared [`EventBus`]. A standalone worker instead
//! publishes each envelope on the `pvw_job_events` PostgreSQL channel with
//! [`relay_to_postgres`], and the API re-emits them with
//! [`listen_for_job_events`].

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::{Pool, Postgres};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use pvw_core::{defaults, EventBus, EventEnvelope, ServerEvent};

use crate::worker::WorkerEvent;

/// Bridge worker events onto the event bus until the worker channel closes.
pub async fn bridge_to_bus(mut worker_rx: broadcast::Receiver<WorkerEvent>, event_bus: Arc<EventBus>) {
    loop {
        match worker_rx.recv().await {
            Ok(event) => {
                if let Some(server_event) = event.to_server_event() {
                    event_bus.emit(server_event);
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!(missed = n, "Event bridge lagged, missed events");
            }
            Err(RecvError::Closed) => {
                info!("Worker event channel closed, bridge stopping");
                break;
            }
        }
    }
}

/// PostgreSQL rejects `pg_notify` payloads of 8000 bytes or more.
const NOTIFY_PAYLOAD_MAX_BYTES: usize = 7_999;

/// Longest error or progress message relayed before shrinking further.
const RELAYED_TEXT_MAX_BYTES: usize = 2_000;

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut.
fn truncate_text(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("...");
}

/// Serialize an envelope for `pg_notify`, truncating free-text fields until
/// it fits. `None` if it cannot be made to fit.
pub fn notification_payload(event: ServerEvent) -> Option<String> {
    let mut envelope = EventEnvelope::new(event);
    let mut max_text = RELAYED_TEXT_MAX_BYTES;
    loop {
        match &mut envelope.payload {
            ServerEvent::JobFailed { error, .. } => truncate_text(error, max_text),
            ServerEvent::JobProgress {
                message: Some(message),
                ..
            } => truncate_text(message, max_text),
            _ => {}
        }
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to serialize event for relay");
                return None;
            }
        };
        if payload.len() <= NOTIFY_PAYLOAD_MAX_BYTES {
            return Some(payload);
        }
        if max_text == 0 {
            warn!(
                event_type = %envelope.event_type,
                bytes = payload.len(),
                "Job event too large to relay"
            );
            return None;
        }
        max_text /= 2;
    }
}

/// Publish worker events on the PostgreSQL notification channel.
pub async fn relay_to_postgres(mut worker_rx: broadcast::Receiver<WorkerEvent>, pool: Pool<Postgres>) {
    loop {
        match worker_rx.recv().await {
            Ok(event) => {
                let Some(server_event) = event.to_server_event() else {
                    continue;
                };
                let event_type = server_event.event_type();
                let Some(payload) = notification_payload(server_event) else {
                    continue;
                };
                if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
                    .bind(defaults::JOB_EVENTS_CHANNEL)
                    .bind(&payload)
                    .execute(&pool)
                    .await
                {
                    warn!(
                        subsystem = "jobs",
                        component = "relay",
                        error = %e,
                        event_type,
                        "Failed to publish job event"
                    );
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!(missed = n, "Event relay lagged, missed events");
            }
            Err(RecvError::Closed) => {
                info!("Worker event channel closed, relay stopping");
                break;
            }
        }
    }
}

/// Parse a notification payload back into an envelope.
pub fn decode_notification(payload: &str) -> Option<EventEnvelope> {
    match serde_json::from_str::<EventEnvelope>(payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed job event notification");
            None
        }
    }
}

/// Listen on the job events channel and re-emit envelopes on `event_bus`.
///
/// Reconnects after a short delay when the listener connection drops.
pub async fn listen_for_job_events(pool: Pool<Postgres>, event_bus: Arc<EventBus>) {
    let retry_delay = Duration::from_secs(5);
    loop {
        let mut listener = match PgListener::connect_with(&pool).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "Failed to open job event listener, retrying");
                tokio::time::sleep(retry_delay).await;
                continue;
            }
        };
        if let Err(e) = listener.listen(defaults::JOB_EVENTS_CHANNEL).await {
            warn!(error = %e, "Failed to LISTEN on job events channel, retrying");
            tokio::time::sleep(retry_delay).await;
            continue;
        }
        info!(
            channel = defaults::JOB_EVENTS_CHANNEL,
            "Listening for job events from external workers"
        );

        loop {
            match listener.recv().await {
                Ok(notification) => {
                    if let Some(envelope) = decode_notification(notification.payload()) {
                        debug!(event_type = %envelope.event_type, "Relayed job event");
                        event_bus.emit_envelope(envelope);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Job event listener failed, reconnecting");
                    break;
                }
            }
        }
        tokio::time::sleep(retry_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvw_core::OperationType;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_bridge_emits_server_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut bus_rx = bus.subscribe();
        let (tx, rx) = broadcast::channel(16);

        let bridge = tokio::spawn(bridge_to_bus(rx, bus.clone()));

        let job_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        tx.send(WorkerEvent::WorkerStarted).unwrap();
        tx.send(WorkerEvent::JobStarted {
            job_id,
            file_id,
            operation_type: OperationType::ComplianceScan,
            attempt: 1,
        })
        .unwrap();
        drop(tx);
        bridge.await.unwrap();

        let envelope = bus_rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "job_started");
        assert_eq!(
            envelope.payload,
            ServerEvent::JobStarted {
                job_id,
                file_id,
                operation_type: OperationType::ComplianceScan,
                attempt: 1,
            }
        );
        assert!(bus_rx.try_recv().is_err());
    }

    #[test]
    fn test_decode_notification() {
        let envelope = EventEnvelope::new(ServerEvent::JobProgress {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            progress: 50,
            message: None,
        });
        let payload = serde_json::to_string(&envelope).unwrap();

        let decoded = decode_notification(&payload).unwrap();
        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.payload, envelope.payload);

        assert!(decode_notification("not json").is_none());
    }

    #[test]
    fn test_long_failure_is_truncated_to_fit_notify() {
        let error = format!("HTTP 500: {}", "é".repeat(20_000));
        let payload = notification_payload(ServerEvent::JobFailed {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            operation_type: OperationType::ImportEntities,
            error,
            will_retry: false,
        })
        .unwrap();
        assert!(payload.len() <= NOTIFY_PAYLOAD_MAX_BYTES);

        let decoded = decode_notification(&payload).unwrap();
        let ServerEvent::JobFailed { error, .. } = decoded.payload else {
            panic!("expected job_failed");
        };
        assert!(error.starts_with("HTTP 500: "));
        assert!(error.ends_with("..."));
        assert!(error.len() <= RELAYED_TEXT_MAX_BYTES + 3);
    }

    #[test]
    fn test_escaped_failure_shrinks_until_it_fits() {
        let payload = notification_payload(ServerEvent::JobFailed {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            operation_type: OperationType::DataQualityCheck,
            error: "\u{1}".repeat(5_000),
            will_retry: true,
        })
        .unwrap();
        assert!(payload.len() <= NOTIFY_PAYLOAD_MAX_BYTES);
    }

    #[test]
    fn test_short_event_relayed_unchanged() {
        let event = ServerEvent::JobFailed {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            operation_type: OperationType::DataQualityCheck,
            error: "parse error".to_string(),
            will_retry: true,
        };
        let payload = notification_payload(event.clone()).unwrap();
        assert_eq!(decode_notification(&payload).unwrap().payload, event);
    }
}
