use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::encryption::TokenCipher;
use crate::entities::credit_card::{self, ActiveModel as CreditCardActiveModel, Column, Entity as CreditCardEntity};
use crate::errors::ServiceError;
use crate::models::{CardBrand, CreditCard};
use crate::repositories::Repository;

use super::BaseRepository;

/// Stored cards. Holds masked number data only; the token column is ciphertext.
#[derive(Debug, Clone)]
pub struct CreditCardRepository {
    base: BaseRepository,
    cipher: TokenCipher,
}

impl CreditCardRepository {
    pub fn new(db: Arc<DatabaseConnection>, cipher: TokenCipher) -> Self {
        Self {
            base: BaseRepository::new(db),
            cipher,
        }
    }

    pub async fn insert(&self, card: &CreditCard) -> Result<(), ServiceError> {
        CreditCardActiveModel {
            id: Set(card.id),
            customer_id: Set(card.customer_id),
            masked_number: Set(card.masked_number.clone()),
            last_four: Set(card.last_four.clone()),
            bin: Set(card.bin.clone()),
            brand: Set(card.brand.to_string()),
            expiration_date: Set(card.expiration_date.clone()),
            cardholder_name: Set(card.cardholder_name.clone()),
            token: Set(self.cipher.encrypt(&card.token)?),
            created_at: Set(card.created_at),
        }
        .insert(self.get_db())
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<CreditCard>, ServiceError> {
        CreditCardEntity::find_by_id(id)
            .one(self.get_db())
            .await?
            .map(|model| self.hydrate(model))
            .transpose()
    }

    pub async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<CreditCard>, ServiceError> {
        CreditCardEntity::find()
            .filter(Column::CustomerId.eq(customer_id))
            .order_by_desc(Column::CreatedAt)
            .all(self.get_db())
            .await?
            .into_iter()
            .map(|model| self.hydrate(model))
            .collect()
    }

    pub async fn exists(&self, id: Uuid) -> Result<bool, ServiceError> {
        Ok(CreditCardEntity::find_by_id(id).count(self.get_db()).await? > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = CreditCardEntity::delete_by_id(id).exec(self.get_db()).await?;
        Ok(result.rows_affected > 0)
    }

    /// Row exactly as stored.
    pub async fn find_raw(&self, id: Uuid) -> Result<Option<credit_card::Model>, ServiceError> {
        Ok(CreditCardEntity::find_by_id(id).one(self.get_db()).await?)
    }

    fn hydrate(&self, model: credit_card::Model) -> Result<CreditCard, ServiceError> {
        Ok(CreditCard {
            id: model.id,
            customer_id: model.customer_id,
            masked_number: model.masked_number,
            last_four: model.last_four,
            bin: model.bin,
            brand: model.brand.parse().unwrap_or(CardBrand::Unknown),
            expiration_date: model.expiration_date,
            cardholder_name: model.cardholder_name,
            token: self.cipher.decrypt(&model.token)?,
            created_at: model.created_at,
        })
    }
}

impl Repository for CreditCardRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
