use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use parley_core::audit::{AuditEvent, AuditSink};
use parley_db::repositories::AuditRepository;

const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Hands audit events to a background task that persists them. `emit` never
/// blocks the pipeline; a full queue drops the event with a warning.
#[derive(Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        if let Err(error) = self.sender.try_send(event) {
            let event = match &error {
                mpsc::error::TrySendError::Full(event) | mpsc::error::TrySendError::Closed(event) => {
                    event
                }
            };
            warn!(
                event_name = "audit.dropped",
                correlation_id = %event.correlation_id,
                audit_event_type = %event.event_type,
                error = %error,
                "audit event dropped"
            );
        }
    }
}

/// Starts the writer. The task ends once every sink clone is dropped and the
/// queue is drained.
pub fn spawn(repository: Arc<dyn AuditRepository>) -> (ChannelAuditSink, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<AuditEvent>(AUDIT_QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Err(error) = repository.append(&event).await {
                warn!(
                    event_name = "audit.write_failed",
                    correlation_id = %event.correlation_id,
                    audit_event_type = %event.event_type,
                    error = %error,
                    "failed to persist audit event"
                );
            }
        }
    });
    (ChannelAuditSink { sender }, handle)
}
