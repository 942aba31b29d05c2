use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::executor::BackgroundExecutor;
use crate::models::{AuditEventType, Money, NewAuditEvent, Product};
use crate::repositories::ProductRepository;
use crate::services::audit::AuditService;
use crate::tracing::TraceContext;

const SEARCH_LIMIT: u64 = 50;

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub stock: i32,
}

#[derive(Clone)]
pub struct CatalogService {
    products: Arc<ProductRepository>,
    audit: AuditService,
    executor: BackgroundExecutor,
}

impl CatalogService {
    pub fn new(products: Arc<ProductRepository>, audit: AuditService, executor: BackgroundExecutor) -> Self {
        Self {
            products,
            audit,
            executor,
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_product(&self, request: NewProduct) -> Result<Product, ServiceError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServiceError::ValidationError(
                "product name must not be empty".to_string(),
            ));
        }
        if request.stock < 0 {
            return Err(ServiceError::ValidationError(format!(
                "stock must not be negative, got {}",
                request.stock
            )));
        }

        let now = Utc::now();
        let product = self
            .products
            .insert(&Product {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: request.description,
                price: request.price,
                stock: request.stock,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product, ServiceError> {
        self.products
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", id))
    }

    /// Case-insensitive name search. The analytics record for the search is
    /// written in the background.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id))]
    pub async fn search_products(
        &self,
        ctx: &TraceContext,
        term: &str,
    ) -> Result<Vec<Product>, ServiceError> {
        let term = term.trim();
        let results = self.products.search_by_name(term, SEARCH_LIMIT).await?;

        let audit = self.audit.clone();
        let event = NewAuditEvent::new(AuditEventType::ProductSearch, "Product", "search")
            .with_data(json!({ "term": term, "results": results.len() }));
        self.executor
            .execute(ctx.clone(), "product_search_audit", async move {
                if let Err(e) = audit.record_current(event).await {
                    error!(error = %e, "failed to record product search");
                }
            })
            .await;

        Ok(results)
    }
}
