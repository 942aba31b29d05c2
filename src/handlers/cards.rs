use axum::{
    extract::{Extension, Path, State},
    response::Response,
    Json,
};
use uuid::Uuid;

use super::common::{created_response, success_response, validate_input};
use crate::errors::ServiceError;
use crate::models::CardData;
use crate::tracing::TraceContext;
use crate::AppState;

/// Exchange card details for a payment token. The response never contains the
/// full number or the CVV.
pub async fn tokenize_card(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(card): Json<CardData>,
) -> Result<Response, ServiceError> {
    validate_input(&card)?;
    let tokenized = state.services.tokenization.tokenize(&ctx, card).await?;
    Ok(created_response(tokenized))
}

pub async fn list_customer_cards(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let cards = state.services.tokenization.list_cards(customer_id).await?;
    Ok(success_response(cards))
}
