use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{AuditLogEntry, NewAuditEvent};
use crate::repositories::AuditLogRepository;
use crate::tracing::TraceContext;

/// Writes and reads the append-only audit trail.
#[derive(Clone)]
pub struct AuditService {
    repo: Arc<AuditLogRepository>,
}

impl AuditService {
    pub fn new(repo: Arc<AuditLogRepository>) -> Self {
        Self { repo }
    }

    /// Stamps `event` with the trace id and user of `ctx` and stores it.
    pub async fn record(
        &self,
        ctx: &TraceContext,
        event: NewAuditEvent,
    ) -> Result<AuditLogEntry, ServiceError> {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            trace_id: ctx.trace_id.to_string(),
            event_type: event.event_type.to_string(),
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            status: event.status.to_string(),
            error_message: event.error_message,
            event_data: event.event_data,
            user_id: ctx.user_id.clone(),
            timestamp: Utc::now(),
        };

        info!(
            trace_id = %entry.trace_id,
            event_type = %entry.event_type,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            status = %entry.status,
            "audit_log"
        );

        self.repo.append(&entry).await?;
        Ok(entry)
    }

    /// Records against whatever context is installed on the current task.
    /// Used by background jobs, which get theirs from the executor.
    pub async fn record_current(&self, event: NewAuditEvent) -> Result<AuditLogEntry, ServiceError> {
        let ctx = TraceContext::current_or_generate();
        self.record(&ctx, event).await
    }

    #[instrument(skip(self))]
    pub async fn find_by_trace_id(&self, trace_id: &str) -> Result<Vec<AuditLogEntry>, ServiceError> {
        self.repo.find_by_trace_id(trace_id).await
    }

    #[instrument(skip(self))]
    pub async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, ServiceError> {
        self.repo.find_by_entity(entity_type, entity_id).await
    }
}
