use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::common::{success_response, validate_input};
use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,
}

pub async fn add_item(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<AddCartItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let cart = state
        .services
        .carts
        .add_item(customer_id, request.product_id, request.quantity)
        .await?;
    Ok(success_response(cart))
}

pub async fn get_cart(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.carts.get_cart(customer_id).await?,
    ))
}
