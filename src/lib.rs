//! Fulfillment API Library
//!
//! Checkout and payment core: stock reservation, card tokenization, payment
//! with retries, the order lifecycle and a trace-correlated audit trail.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod encryption;
pub mod entities;
pub mod errors;
pub mod executor;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub services: handlers::AppServices,
}

// Common response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            trace_id: crate::tracing::current_trace_id().map(|id| id.to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    use crate::handlers::{audit, cards, carts, checkout, customers, health, orders, products};

    Router::new()
        .route("/health", get(health::health_check))
        // Orders
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/payment", post(orders::process_payment))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        // Checkout
        .route("/checkout", post(checkout::checkout))
        // Carts
        .route("/carts/:customer_id", get(carts::get_cart))
        .route("/carts/:customer_id/items", post(carts::add_item))
        // Cards
        .route("/cards/tokenize", post(cards::tokenize_card))
        .route("/customers/:id/cards", get(cards::list_customer_cards))
        // Customers
        .route("/customers", post(customers::register_customer))
        .route("/customers/:id", get(customers::get_customer))
        .route("/customers/:id/orders", get(orders::list_customer_orders))
        // Catalogue
        .route("/products", post(products::create_product))
        .route("/products/search", get(products::search_products))
        .route("/products/:id", get(products::get_product))
        // Audit trail
        .route("/audit/traces/:trace_id", get(audit::by_trace))
        .route(
            "/audit/entities/:entity_type/:entity_id",
            get(audit::by_entity),
        )
}

/// Full application router. The trace id middleware must stay the outermost layer.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .fallback(route_not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(crate::tracing::TraceSpanMaker))
        .layer(middleware::from_fn(
            middleware_helpers::correlation::trace_id_middleware,
        ))
}

async fn route_not_found() -> (StatusCode, axum::Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        axum::Json(ApiResponse::error("route not found".to_string())),
    )
}
