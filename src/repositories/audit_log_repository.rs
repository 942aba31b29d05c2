use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::entities::audit_log::{self, ActiveModel as AuditLogActiveModel, Column, Entity as AuditLogEntity};
use crate::errors::ServiceError;
use crate::models::AuditLogEntry;
use crate::repositories::Repository;

use super::BaseRepository;

impl From<audit_log::Model> for AuditLogEntry {
    fn from(model: audit_log::Model) -> Self {
        AuditLogEntry {
            id: model.id,
            trace_id: model.trace_id,
            event_type: model.event_type,
            entity_type: model.entity_type,
            entity_id: model.entity_id,
            status: model.status,
            error_message: model.error_message,
            // Rows are only written by this repository, always as valid JSON
            event_data: model
                .event_data
                .and_then(|raw| serde_json::from_str(&raw).ok()),
            user_id: model.user_id,
            timestamp: model.timestamp,
        }
    }
}

/// Append-only store; there is no update or delete.
#[derive(Debug, Clone)]
pub struct AuditLogRepository {
    base: BaseRepository,
}

impl AuditLogRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn append(&self, entry: &AuditLogEntry) -> Result<(), ServiceError> {
        AuditLogActiveModel {
            id: Set(entry.id),
            trace_id: Set(entry.trace_id.clone()),
            event_type: Set(entry.event_type.clone()),
            entity_type: Set(entry.entity_type.clone()),
            entity_id: Set(entry.entity_id.clone()),
            status: Set(entry.status.clone()),
            error_message: Set(entry.error_message.clone()),
            event_data: Set(entry.event_data.as_ref().map(|data| data.to_string())),
            user_id: Set(entry.user_id.clone()),
            timestamp: Set(entry.timestamp),
        }
        .insert(self.get_db())
        .await?;
        Ok(())
    }

    pub async fn find_by_trace_id(&self, trace_id: &str) -> Result<Vec<AuditLogEntry>, ServiceError> {
        Ok(AuditLogEntity::find()
            .filter(Column::TraceId.eq(trace_id))
            .order_by_asc(Column::Timestamp)
            .all(self.get_db())
            .await?
            .into_iter()
            .map(AuditLogEntry::from)
            .collect())
    }

    pub async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, ServiceError> {
        Ok(AuditLogEntity::find()
            .filter(Column::EntityType.eq(entity_type))
            .filter(Column::EntityId.eq(entity_id))
            .order_by_asc(Column::Timestamp)
            .all(self.get_db())
            .await?
            .into_iter()
            .map(AuditLogEntry::from)
            .collect())
    }
}

impl Repository for AuditLogRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
