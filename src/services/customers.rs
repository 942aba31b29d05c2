use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::validate_email;

use crate::errors::ServiceError;
use crate::models::{AuditEventType, Customer, NewAuditEvent};
use crate::repositories::CustomerRepository;
use crate::services::audit::AuditService;
use crate::tracing::TraceContext;

/// Customer registry. Emails are unique, compared case-insensitively.
#[derive(Clone)]
pub struct CustomerService {
    customers: Arc<CustomerRepository>,
    audit: AuditService,
}

impl CustomerService {
    pub fn new(customers: Arc<CustomerRepository>, audit: AuditService) -> Self {
        Self { customers, audit }
    }

    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id))]
    pub async fn register(
        &self,
        ctx: &TraceContext,
        name: &str,
        email: &str,
    ) -> Result<Customer, ServiceError> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() {
            return Err(ServiceError::ValidationError(
                "customer name must not be empty".to_string(),
            ));
        }
        if !validate_email(email.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "{:?} is not a valid email address",
                email
            )));
        }
        if self.customers.exists_by_email(&email).await? {
            return Err(ServiceError::DuplicateCustomer(email));
        }

        let customer = self
            .customers
            .insert(&Customer {
                id: Uuid::new_v4(),
                name: name.to_string(),
                email,
                created_at: Utc::now(),
            })
            .await?;

        info!(customer_id = %customer.id, "customer registered");
        if let Err(e) = self
            .audit
            .record(
                ctx,
                NewAuditEvent::new(AuditEventType::CustomerRegistered, "Customer", customer.id)
                    .with_data(json!({ "email": customer.email })),
            )
            .await
        {
            error!(error = %e, "failed to audit customer registration");
        }
        Ok(customer)
    }

    pub async fn get(&self, id: Uuid) -> Result<Customer, ServiceError> {
        self.customers
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", id))
    }
}
