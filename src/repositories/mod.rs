use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub mod audit_log_repository;
pub mod cart_repository;
pub mod credit_card_repository;
pub mod customer_repository;
pub mod order_repository;
pub mod product_repository;

pub use audit_log_repository::AuditLogRepository;
pub use cart_repository::CartRepository;
pub use credit_card_repository::CreditCardRepository;
pub use customer_repository::CustomerRepository;
pub use order_repository::OrderRepository;
pub use product_repository::ProductRepository;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}
