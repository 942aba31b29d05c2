//! Product stock accounting.
//!
//! Every change is a single conditional `UPDATE`, so concurrent reservations of
//! the same product are serialised by the database row and never oversell. No
//! row lock is taken and nothing is read-then-written.

use metrics::counter;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{AuditEventType, NewAuditEvent};
use crate::repositories::ProductRepository;
use crate::services::audit::AuditService;
use crate::tracing::TraceContext;

/// A successful reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub product_id: Uuid,
    pub quantity: i32,
    pub remaining: i32,
}

#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    audit: AuditService,
    min_stock_threshold: i32,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>, audit: AuditService, min_stock_threshold: i32) -> Self {
        Self {
            db,
            audit,
            min_stock_threshold,
        }
    }

    /// Takes `quantity` units on `conn`, which may be an open transaction.
    /// Nothing changes unless the full quantity is available.
    pub async fn reduce_on<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation, ServiceError> {
        check_quantity(quantity)?;

        if ProductRepository::decrement_stock_if_available(conn, product_id, quantity).await? {
            let remaining = ProductRepository::current_stock(conn, product_id)
                .await?
                .unwrap_or_default();
            return Ok(Reservation {
                product_id,
                quantity,
                remaining,
            });
        }

        counter!("fulfillment_stock.reservation_failures", 1);
        match ProductRepository::current_stock(conn, product_id).await? {
            None => Err(ServiceError::not_found("Product", product_id)),
            Some(available) => Err(ServiceError::InsufficientStock {
                product_id,
                available,
                requested: quantity,
            }),
        }
    }

    /// Returns `quantity` units on `conn`.
    pub async fn increase_on<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        check_quantity(quantity)?;
        if ProductRepository::increment_stock(conn, product_id, quantity).await? {
            Ok(())
        } else {
            Err(ServiceError::not_found("Product", product_id))
        }
    }

    /// Standalone reduction with its own audit trail.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id))]
    pub async fn reduce(
        &self,
        ctx: &TraceContext,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation, ServiceError> {
        match Self::reduce_on(self.db.as_ref(), product_id, quantity).await {
            Ok(reservation) => {
                self.after_reserved(ctx, &[reservation]).await;
                Ok(reservation)
            }
            Err(e) => {
                self.reservation_failed(ctx, product_id, quantity, &e).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id))]
    pub async fn increase(
        &self,
        ctx: &TraceContext,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        Self::increase_on(self.db.as_ref(), product_id, quantity).await?;
        self.after_released(ctx, product_id, quantity).await;
        Ok(())
    }

    /// Audits committed reservations and flags products that fell below the
    /// low-stock threshold.
    pub async fn after_reserved(&self, ctx: &TraceContext, reservations: &[Reservation]) {
        for r in reservations {
            info!(
                trace_id = %ctx.trace_id,
                product_id = %r.product_id,
                quantity = r.quantity,
                remaining = r.remaining,
                "stock reserved"
            );
            self.emit(
                ctx,
                NewAuditEvent::new(AuditEventType::StockReserved, "Product", r.product_id)
                    .with_data(json!({ "quantity": r.quantity, "remaining": r.remaining })),
            )
            .await;

            if r.remaining < self.min_stock_threshold {
                warn!(
                    product_id = %r.product_id,
                    remaining = r.remaining,
                    threshold = self.min_stock_threshold,
                    "low stock"
                );
                self.emit(
                    ctx,
                    NewAuditEvent::new(AuditEventType::LowStock, "Product", r.product_id)
                        .warning()
                        .with_data(json!({
                            "remaining": r.remaining,
                            "threshold": self.min_stock_threshold,
                        })),
                )
                .await;
            }
        }
    }

    pub async fn after_released(&self, ctx: &TraceContext, product_id: Uuid, quantity: i32) {
        info!(trace_id = %ctx.trace_id, product_id = %product_id, quantity, "stock released");
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::StockReleased, "Product", product_id)
                .with_data(json!({ "quantity": quantity })),
        )
        .await;
    }

    pub async fn reservation_failed(
        &self,
        ctx: &TraceContext,
        product_id: Uuid,
        quantity: i32,
        cause: &ServiceError,
    ) {
        warn!(
            trace_id = %ctx.trace_id,
            product_id = %product_id,
            quantity,
            error = %cause,
            "stock reservation failed"
        );
        let mut data = json!({ "requested": quantity });
        if let ServiceError::InsufficientStock { available, .. } = cause {
            data["available"] = json!(available);
        }
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::StockReservationFailed, "Product", product_id)
                .failed(cause.to_string())
                .with_data(data),
        )
        .await;
    }

    async fn emit(&self, ctx: &TraceContext, event: NewAuditEvent) {
        if let Err(e) = self.audit.record(ctx, event).await {
            error!(error = %e, "failed to write stock audit record");
        }
    }
}

fn check_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}
