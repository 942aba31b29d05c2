use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{AuditEventType, CardBrand, CardData, CreditCard, NewAuditEvent};
use crate::repositories::CreditCardRepository;
use crate::services::audit::AuditService;
use crate::services::simulated_failure;
use crate::tracing::TraceContext;

const TOKEN_PREFIX: &str = "tok_";
const TOKEN_BODY_LEN: usize = 32;

/// What the caller gets back for a tokenized card. No full number, no CVV.
#[derive(Debug, Clone, Serialize)]
pub struct TokenizedCard {
    pub card_id: Uuid,
    pub token: String,
    pub masked_number: String,
    pub last_four: String,
    pub brand: CardBrand,
    pub expiration_date: String,
}

/// Exchanges raw card data for an opaque payment token.
#[derive(Clone)]
pub struct TokenizationService {
    cards: Arc<CreditCardRepository>,
    audit: AuditService,
    failure_percent: u32,
}

impl TokenizationService {
    pub fn new(cards: Arc<CreditCardRepository>, audit: AuditService, failure_percent: u32) -> Self {
        Self {
            cards,
            audit,
            failure_percent,
        }
    }

    /// Validates the card, simulates the vault round trip and stores the
    /// masked card with its (encrypted) token. The CVV is dropped here.
    #[instrument(skip(self, ctx, card), fields(trace_id = %ctx.trace_id, customer_id = %card.customer_id))]
    pub async fn tokenize(
        &self,
        ctx: &TraceContext,
        card: CardData,
    ) -> Result<TokenizedCard, ServiceError> {
        let number = card.check()?;

        if !number.is_luhn_valid() {
            warn!(card = %number, "card number fails Luhn check; continuing");
        }

        if simulated_failure(self.failure_percent) {
            counter!("fulfillment_tokenization.failures", 1);
            let message = "card vault unavailable".to_string();
            warn!(card = %number, "tokenization failed");
            self.emit(
                ctx,
                NewAuditEvent::new(AuditEventType::TokenizationFailed, "Customer", card.customer_id)
                    .failed(message.clone())
                    .with_data(json!({ "last_four": number.last_four() })),
            )
            .await;
            return Err(ServiceError::TokenizationFailed(message));
        }

        let token = issue_token();
        let stored = CreditCard {
            id: Uuid::new_v4(),
            customer_id: card.customer_id,
            masked_number: number.masked(),
            last_four: number.last_four().to_string(),
            bin: number.bin().to_string(),
            brand: number.brand(),
            expiration_date: card.expiration_date,
            cardholder_name: card.cardholder_name,
            token: token.clone(),
            created_at: Utc::now(),
        };
        self.cards.insert(&stored).await?;

        counter!("fulfillment_tokenization.successes", 1);
        info!(card_id = %stored.id, card = %number, "card tokenized");
        self.emit(
            ctx,
            NewAuditEvent::new(AuditEventType::CardTokenized, "CreditCard", stored.id).with_data(
                json!({
                    "customer_id": stored.customer_id,
                    "brand": stored.brand,
                    "last_four": stored.last_four,
                }),
            ),
        )
        .await;

        Ok(TokenizedCard {
            card_id: stored.id,
            token,
            masked_number: stored.masked_number,
            last_four: stored.last_four,
            brand: stored.brand,
            expiration_date: stored.expiration_date,
        })
    }

    /// Syntactic check only: `tok_` followed by 32 lowercase hex digits.
    pub fn validate_token(token: &str) -> bool {
        token
            .strip_prefix(TOKEN_PREFIX)
            .map(|body| {
                body.len() == TOKEN_BODY_LEN
                    && body
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            })
            .unwrap_or(false)
    }

    /// Token of a card previously stored for `customer_id`. Cards of other
    /// customers are reported as missing.
    #[instrument(skip(self))]
    pub async fn resolve_stored_token(
        &self,
        customer_id: Uuid,
        card_id: Uuid,
    ) -> Result<String, ServiceError> {
        match self.cards.find_by_id(card_id).await? {
            Some(card) if card.customer_id == customer_id => Ok(card.token),
            _ => Err(ServiceError::not_found("CreditCard", card_id)),
        }
    }

    pub async fn list_cards(&self, customer_id: Uuid) -> Result<Vec<CreditCard>, ServiceError> {
        self.cards.find_by_customer(customer_id).await
    }

    async fn emit(&self, ctx: &TraceContext, event: NewAuditEvent) {
        if let Err(e) = self.audit.record(ctx, event).await {
            error!(error = %e, "failed to write tokenization audit record");
        }
    }
}

fn issue_token() -> String {
    format!("{}{}", TOKEN_PREFIX, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn issued_tokens_pass_validation() {
        for _ in 0..50 {
            assert!(TokenizationService::validate_token(&issue_token()));
        }
    }

    #[rstest]
    #[case("")]
    #[case("tok_")]
    #[case("tok_123")]
    #[case("tok_ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ")]
    #[case("card_0123456789abcdef0123456789abcdef")]
    #[case("tok_0123456789abcdef0123456789abcdef0")]
    fn rejects_malformed_tokens(#[case] token: &str) {
        assert!(!TokenizationService::validate_token(token));
    }
}
