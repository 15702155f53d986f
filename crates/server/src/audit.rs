use sizer_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes audit events to the structured log under the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session = event.session.map(|key| key.to_string()).unwrap_or_default();
        let flow = event.flow.map(|flow| flow.to_string()).unwrap_or_default();
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                target: "audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                category = ?event.category,
                actor = %event.actor,
                session = %session,
                flow = %flow,
                metadata = %metadata,
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                target: "audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                category = ?event.category,
                outcome = ?event.outcome,
                actor = %event.actor,
                session = %session,
                flow = %flow,
                metadata = %metadata,
            ),
        }
    }
}
