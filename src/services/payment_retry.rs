use metrics::counter;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::BusinessRules;
use crate::errors::ServiceError;
use crate::models::{AuditEventType, NewAuditEvent, Order};
use crate::services::audit::AuditService;
use crate::services::payment_gateway::PaymentGateway;
use crate::tracing::TraceContext;

/// Outcome of a run of charge attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub message: String,
    pub attempts_made: u32,
}

impl PaymentResult {
    /// Turns an exhausted run into `PaymentFailed`.
    pub fn into_result(self, order_id: Uuid) -> Result<PaymentResult, ServiceError> {
        if self.success {
            Ok(self)
        } else {
            Err(ServiceError::PaymentFailed {
                order_id,
                reason: self.message,
                attempt_number: self.attempts_made,
            })
        }
    }
}

/// Fixed-delay retry around [`PaymentGateway::charge`]. Stops at the first
/// approval. The wait between attempts is a plain async sleep, so callers
/// must not hold a transaction across [`PaymentRetryPolicy::run`].
#[derive(Clone)]
pub struct PaymentRetryPolicy {
    gateway: Arc<dyn PaymentGateway>,
    audit: AuditService,
    max_attempts: u32,
    delay: Duration,
}

impl PaymentRetryPolicy {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        audit: AuditService,
        max_attempts: u32,
        delay: Duration,
    ) -> Self {
        Self {
            gateway,
            audit,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_rules(gateway: Arc<dyn PaymentGateway>, audit: AuditService, rules: &BusinessRules) -> Self {
        Self::new(gateway, audit, rules.max_retry_attempts, rules.retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[instrument(skip(self, ctx, order, token), fields(trace_id = %ctx.trace_id, order_id = %order.id))]
    pub async fn run(&self, ctx: &TraceContext, order: &Order, token: &str) -> PaymentResult {
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            counter!("fulfillment_payment.attempts", 1);
            debug!(attempt, max = self.max_attempts, "charging");

            match self.gateway.charge(order, token, attempt).await {
                Ok(receipt) => {
                    info!(attempt, transaction_id = %receipt.transaction_id, "payment approved");
                    self.emit(
                        ctx,
                        NewAuditEvent::new(AuditEventType::PaymentAttempt, "Order", order.id)
                            .with_data(json!({
                                "attempt_number": attempt,
                                "transaction_id": receipt.transaction_id,
                            })),
                    )
                    .await;
                    counter!("fulfillment_payment.successes", 1);
                    return PaymentResult {
                        success: true,
                        transaction_id: Some(receipt.transaction_id),
                        message: format!("payment approved on attempt {}", attempt),
                        attempts_made: attempt,
                    };
                }
                Err(decline) => {
                    warn!(attempt, reason = %decline.reason, "payment attempt declined");
                    self.emit(
                        ctx,
                        NewAuditEvent::new(AuditEventType::PaymentAttempt, "Order", order.id)
                            .failed(decline.reason.clone())
                            .with_data(json!({ "attempt_number": attempt })),
                    )
                    .await;
                    last_reason = decline.reason;

                    if attempt < self.max_attempts {
                        sleep(self.delay).await;
                    }
                }
            }
        }

        counter!("fulfillment_payment.exhausted", 1);
        warn!(attempts = self.max_attempts, "payment retries exhausted");
        PaymentResult {
            success: false,
            transaction_id: None,
            message: format!(
                "payment failed after {} attempt(s): {}",
                self.max_attempts, last_reason
            ),
            attempts_made: self.max_attempts,
        }
    }

    async fn emit(&self, ctx: &TraceContext, event: NewAuditEvent) {
        if let Err(e) = self.audit.record(ctx, event).await {
            error!(error = %e, "failed to write payment audit record");
        }
    }
}
