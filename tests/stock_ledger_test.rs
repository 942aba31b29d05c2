mod common;

use assert_matches::assert_matches;
use common::TestApp;
use fulfillment_api::{errors::ServiceError, tracing::TraceContext};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let app = TestApp::file_backed().await;
    let product = app.product("9.99", 5).await;
    let ledger = app.services().ledger.clone();

    let first = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.reduce(&TraceContext::generate(), product.id, 5).await })
    };
    let second = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.reduce(&TraceContext::generate(), product.id, 5).await })
    };

    let outcomes = vec![first.await.unwrap(), second.await.unwrap()];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one reservation may win: {outcomes:?}");
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(ServiceError::InsufficientStock { available: 0, requested: 5, .. }))));
    assert_eq!(app.stock_of(product.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_single_unit_reservations_stop_at_zero() {
    let app = TestApp::file_backed().await;
    let product = app.product("1.00", 5).await;
    let ledger = app.services().ledger.clone();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reduce(&TraceContext::generate(), product.id, 1).await })
        })
        .collect();
    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_matches!(e, ServiceError::InsufficientStock { .. }),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(app.stock_of(product.id).await, 0);
}

#[tokio::test]
async fn insufficient_stock_leaves_stock_untouched() {
    let app = TestApp::new().await;
    let product = app.product("4.00", 3).await;
    let ctx = TraceContext::generate();

    let err = app
        .services()
        .ledger
        .reduce(&ctx, product.id, 4)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock { available: 3, requested: 4, product_id } if product_id == product.id
    );
    assert_eq!(app.stock_of(product.id).await, 3);

    let trail = app
        .services()
        .audit
        .find_by_trace_id(ctx.trace_id.as_str())
        .await
        .unwrap();
    let failed = trail
        .iter()
        .find(|e| e.event_type == "STOCK_RESERVATION_FAILED")
        .expect("failure is audited");
    assert_eq!(failed.status, "FAILURE");
    let data = failed.event_data.as_ref().unwrap();
    assert_eq!(data["requested"], 4);
    assert_eq!(data["available"], 3);
}

#[tokio::test]
async fn rejects_non_positive_quantities_and_unknown_products() {
    let app = TestApp::new().await;
    let product = app.product("1.00", 10).await;
    let ledger = &app.services().ledger;
    let ctx = TraceContext::generate();

    assert_matches!(
        ledger.reduce(&ctx, product.id, 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ledger.increase(&ctx, product.id, -2).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ledger.reduce(&ctx, uuid::Uuid::new_v4(), 1).await,
        Err(ServiceError::NotFound { entity: "Product", .. })
    );
    assert_eq!(app.stock_of(product.id).await, 10);
}

#[tokio::test]
async fn reduce_then_increase_restores_stock() {
    let app = TestApp::new().await;
    let product = app.product("2.50", 20).await;
    let ledger = &app.services().ledger;
    let ctx = TraceContext::generate();

    let reservation = ledger.reduce(&ctx, product.id, 7).await.unwrap();
    assert_eq!(reservation.remaining, 13);
    ledger.increase(&ctx, product.id, 7).await.unwrap();
    assert_eq!(app.stock_of(product.id).await, 20);
}

#[tokio::test]
async fn dropping_below_threshold_records_low_stock_warning() {
    let app = TestApp::new().await;
    let product = app.product("3.00", 8).await;
    let ctx = TraceContext::generate();

    app.services().ledger.reduce(&ctx, product.id, 4).await.unwrap();

    let trail = app
        .services()
        .audit
        .find_by_entity("Product", &product.id.to_string())
        .await
        .unwrap();
    let low = trail
        .iter()
        .find(|e| e.event_type == "LOW_STOCK")
        .expect("low stock is audited");
    assert_eq!(low.status, "WARNING");
    assert_eq!(low.trace_id, ctx.trace_id.as_str());
    assert_eq!(low.event_data.as_ref().unwrap()["remaining"], 4);
}
