use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::encryption::TokenCipher;
use crate::entities::order::{self, ActiveModel as OrderActiveModel, Column, Entity as OrderEntity};
use crate::entities::order_item::{
    self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
};
use crate::errors::ServiceError;
use crate::models::{Money, Order, OrderItem, OrderStatus};
use crate::repositories::Repository;

use super::BaseRepository;

/// Repository for orders and their lines. Payment tokens are encrypted on the
/// way in and decrypted on the way out.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
    cipher: TokenCipher,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>, cipher: TokenCipher) -> Self {
        Self {
            base: BaseRepository::new(db),
            cipher,
        }
    }

    /// Inserts the order header and all of its lines on `conn`.
    pub async fn insert_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &Order,
    ) -> Result<(), ServiceError> {
        let payment_token = self.cipher.encrypt_optional(order.payment_token.as_deref())?;

        OrderActiveModel {
            id: Set(order.id),
            customer_id: Set(order.customer_id),
            status: Set(order.status().to_string()),
            total_amount: Set(order.total_amount().amount()),
            payment_token: Set(payment_token),
            transaction_id: Set(order.transaction_id.clone()),
            delivery_address: Set(order.delivery_address.clone()),
            created_at: Set(order.created_at),
            updated_at: Set(order.updated_at),
        }
        .insert(conn)
        .await?;

        for (position, item) in order.items().iter().enumerate() {
            OrderItemActiveModel {
                id: Set(item.id),
                order_id: Set(order.id),
                product_id: Set(item.product_id),
                position: Set(position as i32),
                quantity: Set(item.quantity as i32),
                unit_price: Set(item.unit_price.amount()),
            }
            .insert(conn)
            .await?;
        }

        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        self.find_by_id_on(self.get_db(), id).await
    }

    pub async fn find_by_id_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Option<Order>, ServiceError> {
        match OrderEntity::find_by_id(id).one(conn).await? {
            Some(model) => Ok(Some(self.hydrate(conn, model).await?)),
            None => Ok(None),
        }
    }

    /// Newest first.
    pub async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let models = OrderEntity::find()
            .filter(Column::CustomerId.eq(customer_id))
            .order_by_desc(Column::CreatedAt)
            .all(self.get_db())
            .await?;

        let mut orders = Vec::with_capacity(models.len());
        for model in models {
            orders.push(self.hydrate(self.get_db(), model).await?);
        }
        Ok(orders)
    }

    /// Moves an order from `expected` to `next` only if it is still in
    /// `expected`. Returns false when another writer got there first.
    pub async fn update_status_if<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(Column::Status, Expr::value(next.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(expected.to_string()))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Moves an order from `expected` to PAYMENT_PROCESSING and stores the
    /// encrypted payment token in the same update. Returns false, writing
    /// nothing, when the order has already left `expected`.
    pub async fn start_payment_if(
        &self,
        id: Uuid,
        expected: OrderStatus,
        token: &str,
    ) -> Result<bool, ServiceError> {
        let encrypted = self.cipher.encrypt(token)?;
        let result = OrderEntity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(OrderStatus::PaymentProcessing.to_string()),
            )
            .col_expr(Column::PaymentToken, Expr::value(encrypted))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(expected.to_string()))
            .exec(self.get_db())
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn set_transaction_id(&self, id: Uuid, transaction_id: &str) -> Result<(), ServiceError> {
        OrderEntity::update_many()
            .col_expr(Column::TransactionId, Expr::value(transaction_id.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(self.get_db())
            .await?;
        Ok(())
    }

    /// Ciphertext exactly as stored. Used to check that nothing leaks in clear.
    pub async fn raw_payment_token(&self, id: Uuid) -> Result<Option<String>, ServiceError> {
        Ok(OrderEntity::find_by_id(id)
            .one(self.get_db())
            .await?
            .and_then(|model| model.payment_token))
    }

    pub async fn exists(&self, id: Uuid) -> Result<bool, ServiceError> {
        Ok(OrderEntity::find_by_id(id).count(self.get_db()).await? > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(id))
            .exec(self.get_db())
            .await?;
        let result = OrderEntity::delete_by_id(id).exec(self.get_db()).await?;
        Ok(result.rows_affected > 0)
    }

    async fn hydrate<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: order::Model,
    ) -> Result<Order, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(model.id))
            .order_by_asc(order_item::Column::Position)
            .all(conn)
            .await?
            .into_iter()
            .map(|item| {
                Ok(OrderItem {
                    id: item.id,
                    product_id: item.product_id,
                    quantity: u32::try_from(item.quantity).map_err(|_| {
                        ServiceError::Unexpected(format!(
                            "order item {} has negative quantity",
                            item.id
                        ))
                    })?,
                    unit_price: Money::new(item.unit_price)?,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let mut order = Order::restore(
            model.id,
            model.customer_id,
            OrderStatus::parse(&model.status)?,
            items,
            model.created_at,
            model.updated_at,
        )?;
        order.payment_token = self.cipher.decrypt_optional(model.payment_token.as_deref())?;
        order.transaction_id = model.transaction_id;
        order.delivery_address = model.delivery_address;
        Ok(order)
    }
}

impl Repository for OrderRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
