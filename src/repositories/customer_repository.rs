use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::customer::{self, ActiveModel as CustomerActiveModel, Column, Entity as CustomerEntity};
use crate::errors::ServiceError;
use crate::models::Customer;
use crate::repositories::Repository;

use super::BaseRepository;

impl From<customer::Model> for Customer {
    fn from(model: customer::Model) -> Self {
        Customer {
            id: model.id,
            name: model.name,
            email: model.email,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    base: BaseRepository,
}

impl CustomerRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn insert(&self, customer: &Customer) -> Result<Customer, ServiceError> {
        let model = CustomerActiveModel {
            id: Set(customer.id),
            name: Set(customer.name.clone()),
            email: Set(customer.email.clone()),
            created_at: Set(customer.created_at),
        }
        .insert(self.get_db())
        .await?;
        Ok(model.into())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Customer>, ServiceError> {
        Ok(CustomerEntity::find_by_id(id)
            .one(self.get_db())
            .await?
            .map(Customer::from))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, ServiceError> {
        Ok(CustomerEntity::find()
            .filter(Column::Email.eq(email))
            .one(self.get_db())
            .await?
            .map(Customer::from))
    }

    pub async fn exists_by_email(&self, email: &str) -> Result<bool, ServiceError> {
        let count = CustomerEntity::find()
            .filter(Column::Email.eq(email))
            .count(self.get_db())
            .await?;
        Ok(count > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = CustomerEntity::delete_by_id(id).exec(self.get_db()).await?;
        Ok(result.rows_affected > 0)
    }
}

impl Repository for CustomerRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
