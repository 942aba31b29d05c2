mod common;

use assert_matches::assert_matches;
use common::{card_for, TestApp, TEST_SECRET, VISA};
use fulfillment_api::{
    encryption::TokenCipher,
    errors::ServiceError,
    models::OrderStatus,
    services::orders::{CreateOrder, OrderLine, PaymentMethod},
    tracing::TraceContext,
};
use uuid::Uuid;

fn single_line(customer_id: Uuid, product_id: Uuid) -> CreateOrder {
    CreateOrder {
        customer_id,
        items: vec![OrderLine {
            product_id,
            quantity: 1,
        }],
        delivery_address: None,
    }
}

#[tokio::test]
async fn payment_tokens_are_stored_encrypted() {
    let app = TestApp::new().await;
    let customer = app.customer().await;
    let product = app.product("5.00", 5).await;
    let ctx = TraceContext::generate();

    let card = app
        .services()
        .tokenization
        .tokenize(&ctx, card_for(customer.id))
        .await
        .unwrap();
    let order = app
        .services()
        .orders
        .place_order(&ctx, single_line(customer.id, product.id), false)
        .await
        .unwrap();
    app.services()
        .orders
        .process_payment(
            &ctx,
            order.id,
            PaymentMethod::Token {
                token: card.token.clone(),
            },
        )
        .await
        .unwrap();

    let stored = app
        .order_repository()
        .raw_payment_token(order.id)
        .await
        .unwrap()
        .expect("token column is populated");
    assert_ne!(stored, card.token);
    assert!(!stored.contains(&card.token));
    assert_eq!(TokenCipher::new(Some(TEST_SECRET)).decrypt(&stored).unwrap(), card.token);

    // the repository hands back plaintext
    let reloaded = app.order_repository().find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(reloaded.payment_token.as_deref(), Some(card.token.as_str()));
}

#[tokio::test]
async fn stored_cards_keep_only_masked_numbers() {
    let app = TestApp::new().await;
    let customer = app.customer().await;

    let card = app
        .services()
        .tokenization
        .tokenize(&TraceContext::generate(), card_for(customer.id))
        .await
        .unwrap();
    assert_eq!(card.last_four, "0366");
    assert!(card.masked_number.ends_with("0366"));
    assert!(!card.masked_number.contains(&VISA[..12]));

    let raw = app
        .card_repository()
        .find_raw(card.card_id)
        .await
        .unwrap()
        .unwrap();
    let row = serde_json::to_string(&raw).unwrap();
    assert!(!row.contains(VISA));
    assert!(!row.contains("\"123\""));
    assert_ne!(raw.token, card.token);
    assert_eq!(TokenCipher::new(Some(TEST_SECRET)).decrypt(&raw.token).unwrap(), card.token);
}

#[tokio::test]
async fn missing_secret_fails_payment_before_the_order_moves() {
    let app = TestApp::without_secret().await;
    let customer = app.customer().await;
    let product = app.product("5.00", 5).await;
    let ctx = TraceContext::generate();

    // orders without a token never touch the codec
    let order = app
        .services()
        .orders
        .place_order(&ctx, single_line(customer.id, product.id), false)
        .await
        .unwrap();

    let err = app
        .services()
        .orders
        .process_payment(
            &ctx,
            order.id,
            PaymentMethod::Token {
                token: "tok_0123456789abcdef0123456789abcdef".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ConfigurationError(_));

    let stored = app.services().orders.get_order(order.id).await.unwrap();
    assert_eq!(stored.status(), OrderStatus::Pending);
}

#[test]
fn wrong_key_cannot_decrypt() {
    let ciphertext = TokenCipher::new(Some(TEST_SECRET))
        .encrypt("tok_0123456789abcdef0123456789abcdef")
        .unwrap();
    let other = TokenCipher::new(Some("a-completely-different-secret-of-enough-length"));
    assert_matches!(other.decrypt(&ciphertext), Err(ServiceError::DecryptionFailed(_)));
}
