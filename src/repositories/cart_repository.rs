use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{cart, cart_item};
use crate::errors::ServiceError;
use crate::models::{Cart, CartLine};
use crate::repositories::Repository;

use super::BaseRepository;

#[derive(Debug, Clone)]
pub struct CartRepository {
    base: BaseRepository,
}

impl CartRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Adds `quantity` of a product, merging into an existing line.
    pub async fn add_line(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Cart, ServiceError> {
        let txn = self.get_db().begin().await?;
        let cart = Self::find_or_create_on(&txn, customer_id).await?;

        let merged = cart_item::Entity::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).add(quantity),
            )
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        if merged.rows_affected == 0 {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                added_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;
        }

        cart::Entity::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart.id))
            .exec(&txn)
            .await?;

        let loaded = Self::load_on(&txn, cart).await?;
        txn.commit().await?;
        Ok(loaded)
    }

    pub async fn find_by_customer(&self, customer_id: Uuid) -> Result<Option<Cart>, ServiceError> {
        Self::find_by_customer_on(self.get_db(), customer_id).await
    }

    pub async fn find_by_customer_on<C: ConnectionTrait>(
        conn: &C,
        customer_id: Uuid,
    ) -> Result<Option<Cart>, ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?;
        match cart {
            Some(cart) => Ok(Some(Self::load_on(conn, cart).await?)),
            None => Ok(None),
        }
    }

    /// Removes every line from the customer's cart. The cart row itself stays.
    pub async fn clear_on<C: ConnectionTrait>(
        conn: &C,
        customer_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let Some(cart) = cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        else {
            return Ok(0);
        };
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    async fn find_or_create_on<C: ConnectionTrait>(
        conn: &C,
        customer_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }
        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;
        Ok(created)
    }

    async fn load_on<C: ConnectionTrait>(conn: &C, cart: cart::Model) -> Result<Cart, ServiceError> {
        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(conn)
            .await?
            .into_iter()
            .map(|item| CartLine {
                product_id: item.product_id,
                quantity: item.quantity.max(0) as u32,
            })
            .collect();
        Ok(Cart {
            id: cart.id,
            customer_id: cart.customer_id,
            lines,
        })
    }
}

impl Repository for CartRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
