use axum::{
    extract::{Extension, Path, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, success_response, validate_input};
use crate::errors::ServiceError;
use crate::tracing::TraceContext;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterCustomerRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
}

pub async fn register_customer(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(request): Json<RegisterCustomerRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let customer = state
        .services
        .customers
        .register(&ctx, &request.name, &request.email)
        .await?;
    Ok(created_response(customer))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.customers.get(id).await?))
}
