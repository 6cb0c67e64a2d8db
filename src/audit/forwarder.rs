use super::event::{EventDetail, EventFields, EventType, Severity};
use super::logger::SecureEventLogger;
use crate::constants::events;
use crate::events::{EventPublisher, LifecycleEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Forwards lifecycle events from the bus to the secure event logger
#[derive(Debug, Clone)]
pub struct AuditForwarder {
    logger: SecureEventLogger,
}

impl AuditForwarder {
    pub fn new(logger: SecureEventLogger) -> Self {
        Self { logger }
    }

    /// Subscribe and forward until the publisher is dropped
    pub fn spawn(self, publisher: &EventPublisher) -> JoinHandle<()> {
        let mut receiver = publisher.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => self.logger.post_event(fields_for(&event)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Audit forwarder lagged, events skipped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, audit forwarder stopping");
                        break;
                    }
                }
            }
        })
    }
}

/// Map a lifecycle event onto the collector's event codes
pub fn fields_for(event: &LifecycleEvent) -> EventFields {
    let (event_type, detail, severity) = match event.name.as_str() {
        events::TASK_SUBMITTED => (EventType::Transfer, EventDetail::Information, Severity::Success),
        events::TASK_UPLOAD_STARTED => (EventType::Transfer, EventDetail::Start, Severity::Information),
        events::TASK_UPLOADED => (EventType::Transfer, EventDetail::End, Severity::Success),
        events::TASK_UPLOAD_FAILED => (EventType::Transfer, EventDetail::Failure, Severity::Warning),
        events::TASK_DOWNLOAD_STARTED => (EventType::Transfer, EventDetail::Start, Severity::Information),
        events::TASK_DOWNLOADED => (EventType::Transfer, EventDetail::End, Severity::Success),
        events::TASK_DOWNLOAD_FAILED => (EventType::Transfer, EventDetail::Failure, Severity::Warning),
        events::TASK_PROCESSING_FAILED => (EventType::Processing, EventDetail::Failure, Severity::Error),
        events::TASK_STORED => (EventType::Storage, EventDetail::End, Severity::Success),
        events::TASK_STORAGE_FAILED => (EventType::Storage, EventDetail::Failure, Severity::Warning),
        events::TASK_ARCHIVED => (EventType::Archive, EventDetail::End, Severity::Success),
        events::TASK_INTEGRITY_VIOLATION => (EventType::Security, EventDetail::Violation, Severity::Critical),
        events::MAINTENANCE_SWEEP => (EventType::Maintenance, EventDetail::Information, Severity::Information),
        _ => (EventType::Generic, EventDetail::Information, Severity::Information),
    };

    let data = match &event.task_id {
        Some(id) => format!("{id} {}", event.context),
        None => event.context.to_string(),
    };

    EventFields::new(event_type, detail, severity)
        .with_info(event.name.clone())
        .with_data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TaskId;
    use serde_json::json;

    #[test]
    fn test_integrity_events_are_critical() {
        let event = LifecycleEvent {
            name: events::TASK_INTEGRITY_VIOLATION.to_string(),
            task_id: Some(TaskId::parse("abc-123").unwrap()),
            context: json!({"reason": "size mismatch"}),
            published_at: chrono::Utc::now(),
        };

        let fields = fields_for(&event);
        assert_eq!(fields.event_type, EventType::Security);
        assert_eq!(fields.severity, Severity::Critical);
        assert!(fields.data.starts_with("abc-123 "));
        assert_eq!(fields.info, events::TASK_INTEGRITY_VIOLATION);
    }

    #[test]
    fn test_unknown_events_are_generic() {
        let event = LifecycleEvent {
            name: "custom".to_string(),
            task_id: None,
            context: json!(null),
            published_at: chrono::Utc::now(),
        };
        assert_eq!(fields_for(&event).event_type, EventType::Generic);
    }
}
