use axum::{
    extract::{Extension, Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, success_response, validate_input};
use crate::errors::ServiceError;
use crate::models::Money;
use crate::services::catalog::NewProduct;
use crate::tracing::TraceContext;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub price: Money,
    #[validate(range(min = 0))]
    pub stock: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchQuery {
    #[serde(default)]
    #[validate(length(max = 100))]
    pub q: String,
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let product = state
        .services
        .catalog
        .create_product(NewProduct {
            name: request.name,
            description: request.description,
            price: request.price,
            stock: request.stock,
        })
        .await?;
    Ok(created_response(product))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.catalog.get_product(id).await?))
}

pub async fn search_products(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ServiceError> {
    validate_input(&query)?;
    let products = state
        .services
        .catalog
        .search_products(&ctx, &query.q)
        .await?;
    Ok(success_response(products))
}
