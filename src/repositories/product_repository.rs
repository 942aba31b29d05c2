use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, Func, LikeExpr}, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::product::{self, ActiveModel as ProductActiveModel, Column, Entity as ProductEntity};
use crate::errors::ServiceError;
use crate::models::{Money, Product};
use crate::repositories::Repository;

use super::BaseRepository;

impl TryFrom<product::Model> for Product {
    type Error = ServiceError;

    fn try_from(model: product::Model) -> Result<Self, Self::Error> {
        Ok(Product {
            id: model.id,
            name: model.name,
            description: model.description,
            price: Money::new(model.price)?,
            stock: model.stock,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Repository for products and their stock counters
#[derive(Debug, Clone)]
pub struct ProductRepository {
    base: BaseRepository,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn insert(&self, product: &Product) -> Result<Product, ServiceError> {
        let model = ProductActiveModel {
            id: Set(product.id),
            name: Set(product.name.clone()),
            description: Set(product.description.clone()),
            price: Set(product.price.amount()),
            stock: Set(product.stock),
            version: Set(product.version),
            created_at: Set(product.created_at),
            updated_at: Set(product.updated_at),
        }
        .insert(self.get_db())
        .await?;
        model.try_into()
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, ServiceError> {
        Self::find_by_id_on(self.get_db(), id).await
    }

    /// Lookup on a caller-supplied connection or transaction.
    pub async fn find_by_id_on<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<Product>, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(conn)
            .await?
            .map(Product::try_from)
            .transpose()
    }

    /// Case-insensitive substring match on the name. `%` and `_` in `term`
    /// match literally.
    pub async fn search_by_name(
        &self,
        term: &str,
        limit: u64,
    ) -> Result<Vec<Product>, ServiceError> {
        ProductEntity::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(Column::Name)))
                    .like(
                        LikeExpr::new(format!("%{}%", escape_like(&term.to_lowercase())))
                            .escape(LIKE_ESCAPE),
                    ),
            )
            .order_by_asc(Column::Name)
            .limit(limit)
            .all(self.get_db())
            .await?
            .into_iter()
            .map(Product::try_from)
            .collect()
    }

    pub async fn exists(&self, id: Uuid) -> Result<bool, ServiceError> {
        let count = ProductEntity::find_by_id(id).count(self.get_db()).await?;
        Ok(count > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = ProductEntity::delete_by_id(id).exec(self.get_db()).await?;
        Ok(result.rows_affected > 0)
    }

    /// `UPDATE products SET stock = stock - q, version = version + 1
    ///  WHERE id = ? AND stock >= q`. Returns whether a row changed.
    pub async fn decrement_stock_if_available<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(Column::Stock, Expr::col(Column::Stock).sub(quantity))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Stock.gte(quantity))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Unconditional increment. Returns whether the product exists.
    pub async fn increment_stock<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(Column::Stock, Expr::col(Column::Stock).add(quantity))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn current_stock<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<i32>, ServiceError> {
        let stock = ProductEntity::find_by_id(id)
            .select_only()
            .column(Column::Stock)
            .into_tuple::<i32>()
            .one(conn)
            .await?;
        Ok(stock)
    }
}

impl Repository for ProductRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}

const LIKE_ESCAPE: char = '\\';

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%"), "50\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("c:\\tmp"), "c:\\\\tmp");
        assert_eq!(escape_like("plain"), "plain");
    }
}
