#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use fulfillment_api::{
    build_router,
    config::{AppConfig, BusinessRules, ExecutorConfig},
    db::{self, DbConfig, DbPool},
    encryption::TokenCipher,
    executor::BackgroundExecutor,
    handlers::AppServices,
    models::{CardData, Customer, Money, Product},
    repositories::{CreditCardRepository, OrderRepository, ProductRepository},
    services::{
        catalog::NewProduct,
        notifications::{EmailNotifier, NotificationError},
        payment_gateway::SimulatedPaymentGateway,
    },
    tracing::{current_trace_id, TraceContext},
    AppState,
};

pub const TEST_SECRET: &str = "test-secret-key-material-for-the-fulfillment-suite";
/// Passes Luhn
pub const VISA: &str = "4532015112830366";

/// Rules with no simulated failures and a near-zero retry delay.
pub fn quiet_rules() -> BusinessRules {
    BusinessRules {
        tokenization_failure_percent: 0,
        payment_rejection_percent: 0,
        max_retry_attempts: 3,
        retry_delay_ms: 1,
        min_stock_threshold: 5,
    }
}

/// Rules under which every charge attempt is declined.
pub fn declining_rules() -> BusinessRules {
    BusinessRules {
        payment_rejection_percent: 100,
        ..quiet_rules()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub kind: &'static str,
    pub to: String,
    pub order_id: Uuid,
    /// Trace id visible to the notifier when it ran
    pub trace_id: Option<String>,
}

/// Email port that remembers what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, kind: &'static str, to: &str, order_id: Uuid) {
        self.sent.lock().unwrap().push(SentEmail {
            kind,
            to: to.to_string(),
            order_id,
            trace_id: current_trace_id().map(|id| id.to_string()),
        });
    }
}

#[async_trait]
impl EmailNotifier for RecordingNotifier {
    async fn send_payment_success_email(
        &self,
        to: &str,
        _customer_name: &str,
        order_id: Uuid,
        _total_amount: Money,
        _transaction_id: &str,
    ) -> Result<(), NotificationError> {
        self.record("success", to, order_id);
        Ok(())
    }

    async fn send_payment_failure_email(
        &self,
        to: &str,
        _customer_name: &str,
        order_id: Uuid,
        _total_amount: Money,
        _attempts: u32,
    ) -> Result<(), NotificationError> {
        self.record("failure", to, order_id);
        Ok(())
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Application wired against a fresh SQLite database, in memory unless
/// built with [`TestApp::file_backed`].
pub struct TestApp {
    pub state: AppState,
    pub db: Arc<DbPool>,
    pub notifier: Arc<RecordingNotifier>,
    router: Router,
    _data_dir: Option<TempDir>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rules(quiet_rules()).await
    }

    pub async fn with_rules(rules: BusinessRules) -> Self {
        Self::build(rules, Some(TEST_SECRET), DbConfig::in_memory(), None).await
    }

    pub async fn without_secret() -> Self {
        Self::build(quiet_rules(), None, DbConfig::in_memory(), None).await
    }

    /// Backed by a SQLite file with a pool of several connections, so
    /// concurrent callers really do race inside the database.
    pub async fn file_backed() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_config = DbConfig::sqlite_file(&dir.path().join("fulfillment.db"), 8);
        Self::build(quiet_rules(), Some(TEST_SECRET), db_config, Some(dir)).await
    }

    async fn build(
        rules: BusinessRules,
        secret: Option<&str>,
        db_config: DbConfig,
        data_dir: Option<TempDir>,
    ) -> Self {
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let mut config = AppConfig::default();
        config.environment = "test".to_string();
        config.business = rules;
        config.encryption.secret_key = secret.map(str::to_string);
        config.executor = ExecutorConfig {
            core_workers: 2,
            max_workers: 4,
            queue_capacity: 32,
            keep_alive_secs: 1,
        };

        let executor = BackgroundExecutor::new(config.executor.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = Arc::new(SimulatedPaymentGateway::new(
            config.business.payment_rejection_percent,
        ));
        let services = AppServices::new(db.clone(), &config, executor, notifier.clone(), gateway);

        let state = AppState {
            db: db.clone(),
            config: Arc::new(config),
            services,
        };
        let router = build_router(state.clone());

        Self {
            state,
            db,
            notifier,
            router,
            _data_dir: data_dir,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    pub fn order_repository(&self) -> OrderRepository {
        OrderRepository::new(self.db.clone(), TokenCipher::new(Some(TEST_SECRET)))
    }

    pub fn card_repository(&self) -> CreditCardRepository {
        CreditCardRepository::new(self.db.clone(), TokenCipher::new(Some(TEST_SECRET)))
    }

    pub async fn customer(&self) -> Customer {
        let email = format!("{}@example.com", Uuid::new_v4().simple());
        self.services()
            .customers
            .register(&TraceContext::generate(), "Ada Lovelace", &email)
            .await
            .expect("register customer")
    }

    pub async fn product(&self, price: &str, stock: i32) -> Product {
        self.services()
            .catalog
            .create_product(NewProduct {
                name: format!("Widget {}", &Uuid::new_v4().simple().to_string()[..8]),
                description: None,
                price: Money::parse(price).expect("price"),
                stock,
            })
            .await
            .expect("create product")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        ProductRepository::current_stock(self.db.as_ref(), product_id)
            .await
            .expect("read stock")
            .expect("product exists")
    }

    /// Waits for every background job (notifications, analytics) to finish.
    pub async fn settle(&self) {
        self.services().executor.wait_idle().await;
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

pub fn card_for(customer_id: Uuid) -> CardData {
    CardData {
        customer_id,
        card_number: VISA.to_string(),
        cvv: "123".to_string(),
        expiration_date: "12/35".to_string(),
        cardholder_name: "Ada Lovelace".to_string(),
    }
}
