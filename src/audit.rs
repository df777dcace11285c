use chrono::Utc;
use tracing::info;

use crate::error::Result;
use crate::types::AuditEvent;

/// Receives structured audit records. Persistence is the sink's business;
/// the vault treats `record` as fire-and-forget and never lets a sink
/// failure abort the primary operation.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Emits audit events as structured log lines.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<()> {
        info!(
            principal = %event.principal_id,
            action = %event.action,
            resource = event.resource.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or("-"),
            "audit"
        );
        Ok(())
    }
}

/// Discards everything. Useful in tests.
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<()> {
        Ok(())
    }
}

/// Builds an event stamped with the current time.
pub(crate) fn event(
    principal_id: &str,
    action: &str,
    resource: Option<&str>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        principal_id: principal_id.to_string(),
        action: action.to_string(),
        resource: resource.map(str::to_string),
        detail,
        source_addr: None,
        timestamp: Utc::now(),
    }
}
