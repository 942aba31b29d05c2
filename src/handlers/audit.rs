use axum::{
    extract::{Path, State},
    response::Response,
};

use super::common::success_response;
use crate::errors::ServiceError;
use crate::AppState;

/// Every audit record written under one trace id, oldest first
pub async fn by_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Response, ServiceError> {
    let entries = state.services.audit.find_by_trace_id(&trace_id).await?;
    Ok(success_response(entries))
}

pub async fn by_entity(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Response, ServiceError> {
    let entries = state
        .services
        .audit
        .find_by_entity(&entity_type, &entity_id)
        .await?;
    Ok(success_response(entries))
}
