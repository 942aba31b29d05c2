pub mod audit;
pub mod cards;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod customers;
pub mod health;
pub mod orders;
pub mod products;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::encryption::TokenCipher;
use crate::executor::BackgroundExecutor;
use crate::repositories::{
    AuditLogRepository, CartRepository, CreditCardRepository, CustomerRepository,
    OrderRepository, ProductRepository,
};
use crate::services::{
    audit::AuditService,
    carts::CartService,
    catalog::CatalogService,
    checkout::CheckoutService,
    customers::CustomerService,
    notifications::{EmailNotifier, NotificationDispatcher},
    orders::OrderService,
    payment_gateway::PaymentGateway,
    payment_retry::PaymentRetryPolicy,
    stock_ledger::StockLedger,
    tokenization::TokenizationService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers, wired once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub audit: AuditService,
    pub catalog: Arc<CatalogService>,
    pub customers: Arc<CustomerService>,
    pub carts: Arc<CartService>,
    pub ledger: StockLedger,
    pub tokenization: Arc<TokenizationService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub executor: BackgroundExecutor,
}

impl AppServices {
    /// Builds every service from `config`. The email and gateway ports are
    /// passed in so tests can substitute their own.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        executor: BackgroundExecutor,
        notifier: Arc<dyn EmailNotifier>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let cipher = TokenCipher::from_config(&config.encryption);
        let rules = &config.business;

        let products = Arc::new(ProductRepository::new(db_pool.clone()));
        let customer_repo = Arc::new(CustomerRepository::new(db_pool.clone()));
        let cart_repo = Arc::new(CartRepository::new(db_pool.clone()));
        let order_repo = Arc::new(OrderRepository::new(db_pool.clone(), cipher.clone()));
        let card_repo = Arc::new(CreditCardRepository::new(db_pool.clone(), cipher));

        let audit = AuditService::new(Arc::new(AuditLogRepository::new(db_pool.clone())));
        let ledger = StockLedger::new(db_pool.clone(), audit.clone(), rules.min_stock_threshold);
        let tokenization = TokenizationService::new(
            card_repo,
            audit.clone(),
            rules.tokenization_failure_percent,
        );
        let payments = PaymentRetryPolicy::from_rules(gateway, audit.clone(), rules);
        let notifications = NotificationDispatcher::new(
            executor.clone(),
            notifier,
            audit.clone(),
            config.notifications.clone(),
        );

        let orders = OrderService::new(
            db_pool.clone(),
            order_repo,
            customer_repo.clone(),
            ledger.clone(),
            tokenization.clone(),
            payments,
            notifications,
            audit.clone(),
        );
        let checkout = CheckoutService::new(cart_repo.clone(), orders.clone());

        Self {
            catalog: Arc::new(CatalogService::new(
                products.clone(),
                audit.clone(),
                executor.clone(),
            )),
            customers: Arc::new(CustomerService::new(customer_repo.clone(), audit.clone())),
            carts: Arc::new(CartService::new(cart_repo, products, customer_repo)),
            tokenization: Arc::new(tokenization),
            orders: Arc::new(orders),
            checkout: Arc::new(checkout),
            ledger,
            audit,
            executor,
        }
    }
}
