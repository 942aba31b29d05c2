use axum::{
    extract::{Extension, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, validate_input};
use crate::errors::ServiceError;
use crate::services::checkout::CheckoutRequest;
use crate::services::orders::PaymentMethod;
use crate::tracing::TraceContext;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    pub customer_id: Uuid,
    #[validate(length(max = 500))]
    pub delivery_address: Option<String>,
    pub payment: PaymentMethod,
}

/// Turn the customer's cart into an order and pay for it
pub async fn checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(body): Json<CheckoutBody>,
) -> Result<Response, ServiceError> {
    validate_input(&body)?;
    if let PaymentMethod::NewCard(card) = &body.payment {
        validate_input(card)?;
    }

    let receipt = state
        .services
        .checkout
        .checkout(
            &ctx,
            CheckoutRequest {
                customer_id: body.customer_id,
                delivery_address: body.delivery_address,
                payment: body.payment,
            },
        )
        .await?;
    Ok(created_response(receipt))
}
