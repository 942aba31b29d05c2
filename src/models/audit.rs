//! Audit trail records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    OrderCreated,
    OrderStatusChanged,
    OrderCancelled,
    StockReserved,
    StockReleased,
    StockReservationFailed,
    LowStock,
    PaymentInitiated,
    PaymentAttempt,
    PaymentSucceeded,
    PaymentFailed,
    CardTokenized,
    TokenizationFailed,
    NotificationSent,
    NotificationFailed,
    ProductSearch,
    CustomerRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
    Warning,
}

/// An audit record before the trace id and timestamp are stamped on it.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: AuditEventType,
    pub entity_type: String,
    pub entity_id: String,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub event_data: Option<JsonValue>,
}

impl NewAuditEvent {
    pub fn new(
        event_type: AuditEventType,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            event_type,
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            status: AuditStatus::Success,
            error_message: None,
            event_data: None,
        }
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = AuditStatus::Failure;
        self.error_message = Some(message.into());
        self
    }

    pub fn warning(mut self) -> Self {
        self.status = AuditStatus::Warning;
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.event_data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub trace_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    pub error_message: Option<String>,
    pub event_data: Option<JsonValue>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_failure_details() {
        let event = NewAuditEvent::new(AuditEventType::PaymentAttempt, "Order", Uuid::nil())
            .failed("declined")
            .with_data(json!({ "attempt": 2 }));
        assert_eq!(event.status, AuditStatus::Failure);
        assert_eq!(event.error_message.as_deref(), Some("declined"));
        assert_eq!(event.event_data.unwrap()["attempt"], 2);
    }

    #[test]
    fn event_types_use_screaming_snake_case() {
        assert_eq!(AuditEventType::LowStock.as_ref(), "LOW_STOCK");
        assert_eq!(AuditEventType::ProductSearch.to_string(), "PRODUCT_SEARCH");
    }
}
