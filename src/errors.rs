use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn current_trace_id() -> Option<String> {
    crate::tracing::current_trace_id().map(|id| id.as_str().to_string())
}

/// Body returned to callers for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error kind
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Correlation id of the request that failed, for support lookups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp: String,
}

/// Closed set of error categories exposed at the core boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    PaymentRequired,
    TokenizationFailed,
    Configuration,
    DecryptionFailed,
    Unexpected,
}

impl ErrorKind {
    /// The single mapping from error kind to HTTP status.
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::TokenizationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Configuration
            | ErrorKind::DecryptionFailed
            | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether messages of this kind are safe to show to API callers.
    pub fn is_user_facing(self) -> bool {
        !matches!(
            self,
            ErrorKind::Configuration | ErrorKind::DecryptionFailed | ErrorKind::Unexpected
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid card number: {0}")]
    InvalidCardNumber(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        order_id: Uuid,
        from: String,
        to: String,
    },

    #[error("Customer with email {0} already exists")]
    DuplicateCustomer(String),

    #[error("Cart for customer {0} is empty")]
    EmptyCart(Uuid),

    #[error("Payment for order {order_id} failed after {attempt_number} attempt(s): {reason}")]
    PaymentFailed {
        order_id: Uuid,
        reason: String,
        attempt_number: u32,
    },

    #[error("Tokenization failed: {0}")]
    TokenizationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) | Self::InvalidAmount(_) | Self::InvalidCardNumber(_) => {
                ErrorKind::Validation
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InsufficientStock { .. }
            | Self::InvalidStateTransition { .. }
            | Self::DuplicateCustomer(_)
            | Self::EmptyCart(_) => ErrorKind::Conflict,
            Self::PaymentFailed { .. } => ErrorKind::PaymentRequired,
            Self::TokenizationFailed(_) => ErrorKind::TokenizationFailed,
            Self::ConfigurationError(_) => ErrorKind::Configuration,
            Self::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            Self::DatabaseError(_) | Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Message suitable for HTTP responses. Internal failures get a generic text.
    pub fn response_message(&self) -> String {
        match self.kind() {
            ErrorKind::Configuration => "Service misconfigured".to_string(),
            ErrorKind::DecryptionFailed | ErrorKind::Unexpected => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = kind.status_code();

        if kind.is_user_facing() {
            tracing::debug!(error = %self, code = %kind, "request failed");
        } else {
            tracing::error!(error = %self, code = %kind, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: kind.as_ref().to_string(),
            message: self.response_message(),
            trace_id: current_trace_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
