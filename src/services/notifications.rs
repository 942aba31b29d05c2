//! Customer email notifications, sent off the request path.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::executor::BackgroundExecutor;
use crate::models::{AuditEventType, Money, NewAuditEvent};
use crate::services::audit::AuditService;
use crate::tracing::TraceContext;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Outbound email port.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailNotifier: Send + Sync {
    async fn send_payment_success_email(
        &self,
        to: &str,
        customer_name: &str,
        order_id: Uuid,
        total_amount: Money,
        transaction_id: &str,
    ) -> Result<(), NotificationError>;

    async fn send_payment_failure_email(
        &self,
        to: &str,
        customer_name: &str,
        order_id: Uuid,
        total_amount: Money,
        attempts: u32,
    ) -> Result<(), NotificationError>;
}

/// Writes the rendered email to the log instead of an SMTP relay.
#[derive(Debug, Clone)]
pub struct LoggingEmailNotifier {
    from_address: String,
}

impl LoggingEmailNotifier {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl EmailNotifier for LoggingEmailNotifier {
    async fn send_payment_success_email(
        &self,
        to: &str,
        customer_name: &str,
        order_id: Uuid,
        total_amount: Money,
        transaction_id: &str,
    ) -> Result<(), NotificationError> {
        info!(
            from = %self.from_address,
            to = %to,
            order_id = %order_id,
            "Payment confirmed: Dear {}, we received {} for order {} (transaction {})",
            customer_name,
            total_amount,
            order_id,
            transaction_id
        );
        Ok(())
    }

    async fn send_payment_failure_email(
        &self,
        to: &str,
        customer_name: &str,
        order_id: Uuid,
        total_amount: Money,
        attempts: u32,
    ) -> Result<(), NotificationError> {
        info!(
            from = %self.from_address,
            to = %to,
            order_id = %order_id,
            "Payment failed: Dear {}, we could not charge {} for order {} after {} attempt(s)",
            customer_name,
            total_amount,
            order_id,
            attempts
        );
        Ok(())
    }
}

/// What a customer is told about a payment.
#[derive(Debug, Clone)]
pub enum PaymentNotice {
    Succeeded {
        transaction_id: String,
    },
    Failed {
        attempts: u32,
    },
}

#[derive(Debug, Clone)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

/// Hands notification sends to the background executor, carrying the
/// caller's trace context so the resulting audit records line up with the
/// request that caused them. Delivery failures are logged and audited, never
/// retried.
#[derive(Clone)]
pub struct NotificationDispatcher {
    executor: BackgroundExecutor,
    notifier: Arc<dyn EmailNotifier>,
    audit: AuditService,
    config: NotificationConfig,
}

impl NotificationDispatcher {
    pub fn new(
        executor: BackgroundExecutor,
        notifier: Arc<dyn EmailNotifier>,
        audit: AuditService,
        config: NotificationConfig,
    ) -> Self {
        Self {
            executor,
            notifier,
            audit,
            config,
        }
    }

    pub async fn dispatch_payment_notice(
        &self,
        ctx: &TraceContext,
        recipient: Recipient,
        order_id: Uuid,
        total_amount: Money,
        notice: PaymentNotice,
    ) {
        if !self.config.enabled {
            debug!(order_id = %order_id, "notifications disabled; skipping");
            return;
        }

        let notifier = Arc::clone(&self.notifier);
        let audit = self.audit.clone();
        let task_name = match notice {
            PaymentNotice::Succeeded { .. } => "payment_success_email",
            PaymentNotice::Failed { .. } => "payment_failure_email",
        };

        self.executor
            .execute(ctx.clone(), task_name, async move {
                let (kind, outcome) = match &notice {
                    PaymentNotice::Succeeded { transaction_id } => (
                        "payment_success",
                        notifier
                            .send_payment_success_email(
                                &recipient.email,
                                &recipient.name,
                                order_id,
                                total_amount,
                                transaction_id,
                            )
                            .await,
                    ),
                    PaymentNotice::Failed { attempts } => (
                        "payment_failure",
                        notifier
                            .send_payment_failure_email(
                                &recipient.email,
                                &recipient.name,
                                order_id,
                                total_amount,
                                *attempts,
                            )
                            .await,
                    ),
                };

                let data = json!({ "notification": kind, "recipient": recipient.email });
                let event = match outcome {
                    Ok(()) => {
                        NewAuditEvent::new(AuditEventType::NotificationSent, "Order", order_id)
                            .with_data(data)
                    }
                    Err(e) => {
                        warn!(order_id = %order_id, error = %e, "notification delivery failed");
                        NewAuditEvent::new(AuditEventType::NotificationFailed, "Order", order_id)
                            .failed(e.to_string())
                            .with_data(data)
                    }
                };

                if let Err(e) = audit.record_current(event).await {
                    error!(order_id = %order_id, error = %e, "failed to audit notification");
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::repositories::AuditLogRepository;
    use crate::tracing::TraceId;

    async fn audit() -> AuditService {
        let db = establish_connection_with_config(&DbConfig::in_memory())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        AuditService::new(Arc::new(AuditLogRepository::new(Arc::new(db))))
    }

    fn executor() -> BackgroundExecutor {
        BackgroundExecutor::new(ExecutorConfig {
            core_workers: 1,
            max_workers: 2,
            queue_capacity: 8,
            keep_alive_secs: 1,
        })
    }

    fn recipient() -> Recipient {
        Recipient {
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
        }
    }

    #[tokio::test]
    async fn delivery_failure_is_audited_under_the_callers_trace() {
        let audit = audit().await;
        let executor = executor();
        let mut notifier = MockEmailNotifier::new();
        notifier
            .expect_send_payment_failure_email()
            .times(1)
            .returning(|_, _, _, _, attempts| {
                assert_eq!(attempts, 3);
                Err(NotificationError::Delivery("relay refused".into()))
            });

        let dispatcher = NotificationDispatcher::new(
            executor.clone(),
            Arc::new(notifier),
            audit.clone(),
            NotificationConfig::default(),
        );
        let order_id = Uuid::new_v4();
        let ctx = TraceContext::new(TraceId::new("notify-1"));
        dispatcher
            .dispatch_payment_notice(
                &ctx,
                recipient(),
                order_id,
                Money::ZERO,
                PaymentNotice::Failed { attempts: 3 },
            )
            .await;
        executor.wait_idle().await;

        let trail = audit.find_by_trace_id("notify-1").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].event_type, "NOTIFICATION_FAILED");
        assert_eq!(trail[0].entity_id, order_id.to_string());
        assert_eq!(trail[0].error_message.as_deref(), Some("Delivery failed: relay refused"));
    }

    #[tokio::test]
    async fn disabled_notifications_send_nothing() {
        let audit = audit().await;
        let executor = executor();
        let mut notifier = MockEmailNotifier::new();
        notifier.expect_send_payment_success_email().times(0);

        let dispatcher = NotificationDispatcher::new(
            executor.clone(),
            Arc::new(notifier),
            audit.clone(),
            NotificationConfig {
                enabled: false,
                ..NotificationConfig::default()
            },
        );
        let ctx = TraceContext::new(TraceId::new("notify-2"));
        dispatcher
            .dispatch_payment_notice(
                &ctx,
                recipient(),
                Uuid::new_v4(),
                Money::ZERO,
                PaymentNotice::Succeeded {
                    transaction_id: "txn_1".to_string(),
                },
            )
            .await;
        executor.wait_idle().await;

        assert!(audit.find_by_trace_id("notify-2").await.unwrap().is_empty());
    }
}
