mod common;

use axum::http::{Method, StatusCode};
use common::{card_for, TestApp};
use fulfillment_api::{
    middleware_helpers::correlation::TRACE_ID_HEADER,
    services::orders::{CreateOrder, OrderLine, PaymentMethod},
    tracing::{current_trace_id, TraceContext, TraceId},
};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn every_record_of_a_payment_carries_the_callers_trace() {
    let app = TestApp::new().await;
    let customer = app.customer().await;
    let product = app.product("10.00", 10).await;
    let ctx = TraceContext::new(TraceId::new("checkout-trace-1")).with_user("clerk-7");

    let order = app
        .services()
        .orders
        .place_order(
            &ctx,
            CreateOrder {
                customer_id: customer.id,
                items: vec![OrderLine {
                    product_id: product.id,
                    quantity: 1,
                }],
                delivery_address: None,
            },
            false,
        )
        .await
        .unwrap();
    app.services()
        .orders
        .process_payment(&ctx, order.id, PaymentMethod::NewCard(card_for(customer.id)))
        .await
        .unwrap();
    app.settle().await;

    let trail = app
        .services()
        .audit
        .find_by_trace_id("checkout-trace-1")
        .await
        .unwrap();
    let kinds: Vec<&str> = trail.iter().map(|e| e.event_type.as_str()).collect();
    for expected in [
        "ORDER_CREATED",
        "STOCK_RESERVED",
        "CARD_TOKENIZED",
        "PAYMENT_INITIATED",
        "PAYMENT_ATTEMPT",
        "PAYMENT_SUCCEEDED",
        "NOTIFICATION_SENT",
    ] {
        assert!(kinds.contains(&expected), "missing {expected}: {kinds:?}");
    }
    assert!(trail.iter().all(|e| e.trace_id == "checkout-trace-1"));
    assert!(trail.iter().all(|e| e.user_id.as_deref() == Some("clerk-7")));

    let sent = app.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].trace_id.as_deref(), Some("checkout-trace-1"));
}

#[tokio::test]
async fn background_jobs_do_not_leak_context_into_later_jobs() {
    let app = TestApp::new().await;
    let executor = &app.services().executor;
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();

    for round in 0..4 {
        let traced = Arc::clone(&seen);
        executor
            .execute(
                TraceContext::new(TraceId::new(format!("job-{round}"))),
                "traced_job",
                async move {
                    traced
                        .lock()
                        .unwrap()
                        .push(current_trace_id().map(|id| id.to_string()));
                },
            )
            .await;
        app.settle().await;

        let untraced = Arc::clone(&seen);
        executor
            .execute_untraced("untraced_job", async move {
                untraced
                    .lock()
                    .unwrap()
                    .push(current_trace_id().map(|id| id.to_string()));
            })
            .await;
        app.settle().await;
    }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 8);
    for (round, pair) in seen.chunks(2).enumerate() {
        assert_eq!(pair[0].as_deref(), Some(format!("job-{round}").as_str()));
        assert_eq!(pair[1], None);
    }
}

#[tokio::test]
async fn http_trace_id_links_response_and_audit_trail() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/customers",
            Some(json!({ "name": "Grace Hopper", "email": "grace@example.com" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let header = response
        .headers
        .get(TRACE_ID_HEADER)
        .expect("trace header")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(response.body["meta"]["trace_id"], header.as_str());

    let audit = app
        .request(Method::GET, &format!("/api/v1/audit/traces/{header}"), None)
        .await;
    assert_eq!(audit.status, StatusCode::OK);
    let records = audit.body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["event_type"], "CUSTOMER_REGISTERED");
    assert_eq!(records[0]["trace_id"], header.as_str());
}

#[tokio::test]
async fn each_request_gets_its_own_trace_id() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/health", None).await;
    let first = response.headers.get(TRACE_ID_HEADER).unwrap().clone();
    let second = app
        .request(Method::GET, "/api/v1/health", None)
        .await
        .headers
        .get(TRACE_ID_HEADER)
        .unwrap()
        .clone();
    assert_ne!(first, second);
}

#[tokio::test]
async fn error_bodies_report_the_request_trace() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let header = response.headers.get(TRACE_ID_HEADER).unwrap().to_str().unwrap();
    assert_eq!(response.body["trace_id"], header);
    assert_eq!(response.body["code"], "not_found");
}

#[tokio::test]
async fn async_search_analytics_keep_the_request_trace() {
    let app = TestApp::new().await;
    app.product("3.00", 10).await;

    let response = app
        .request(Method::GET, "/api/v1/products/search?q=widget", None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let header = response
        .headers
        .get(TRACE_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    app.settle().await;

    let trail = app.services().audit.find_by_trace_id(&header).await.unwrap();
    let search = trail
        .iter()
        .find(|e| e.event_type == "PRODUCT_SEARCH")
        .expect("search is audited in the background");
    let data = search.event_data.as_ref().unwrap();
    assert_eq!(data["term"], "widget");
    assert_eq!(data["results"], 1);
}
