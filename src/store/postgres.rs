use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{FulfillmentStore, StoreResult, StoreTransaction};
use crate::domain::errors::FulfillmentError;
use crate::domain::order::OrderStatus;
use crate::models::{
    Comment, Level, Master, MasterStar, Order, OrderDetails, OrderMaster, OrderProduct,
    OrderProductDetails, OrderProductTool, OrderProductToolDetails, OrderTool, OrderToolDetails,
    Product, Tool,
};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// Concurrency rules:
// - stock is only ever changed by `UPDATE ... WHERE quantity >= $n`, so two
//   orders racing for the last units cannot both succeed
// - status changes lock the order row (`FOR UPDATE`)
// - ratings lock the master row before inserting, so the AVG computed
//   afterwards sees every rating committed before it
//
// ============================================================================

const SCHEMA: &str = include_str!("schema.sql");

const PRODUCT_COLUMNS: &str = "id, name, quantity, price_hourly, price_daily, is_active";
const LEVEL_COLUMNS: &str = "id, name, price_hourly, price_daily";
const TOOL_COLUMNS: &str = "id, name, quantity, price, is_active";
const MASTER_COLUMNS: &str = "id, name, is_active, star";
const ORDER_COLUMNS: &str = "id, user_id, lat, long, address, date, payment_type, with_delivery, \
                             comment_to_delivery, promo_code, total, status, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Creates missing tables; safe to run on every start
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl FulfillmentStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

// ============================================================================
// Row Mapping
// ============================================================================

fn product_from_row(row: &PgRow) -> StoreResult<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        quantity: row.try_get("quantity")?,
        price_hourly: row.try_get("price_hourly")?,
        price_daily: row.try_get("price_daily")?,
        is_active: row.try_get("is_active")?,
    })
}

fn level_from_row(row: &PgRow) -> StoreResult<Level> {
    Ok(Level {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        price_hourly: row.try_get("price_hourly")?,
        price_daily: row.try_get("price_daily")?,
    })
}

fn tool_from_row(row: &PgRow) -> StoreResult<Tool> {
    Ok(Tool {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        is_active: row.try_get("is_active")?,
    })
}

fn master_from_row(row: &PgRow) -> StoreResult<Master> {
    Ok(Master {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        star: row.try_get("star")?,
    })
}

fn order_from_row(row: &PgRow) -> StoreResult<Order> {
    let payment_type: String = row.try_get("payment_type")?;
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        lat: row.try_get("lat")?,
        long: row.try_get("long")?,
        address: row.try_get("address")?,
        date: row.try_get("date")?,
        payment_type: stored_enum("payment_type", &payment_type)?,
        with_delivery: row.try_get("with_delivery")?,
        comment_to_delivery: row.try_get("comment_to_delivery")?,
        promo_code: row.try_get("promo_code")?,
        total: row.try_get("total")?,
        status: stored_enum("status", &status)?,
        created_at: row.try_get("created_at")?,
    })
}

fn order_product_from_row(row: &PgRow) -> StoreResult<OrderProduct> {
    let measure: String = row.try_get("measure")?;

    Ok(OrderProduct {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        product_id: row.try_get("product_id")?,
        level_id: row.try_get("level_id")?,
        count: row.try_get("count")?,
        measure: stored_enum("measure", &measure)?,
        measure_count: row.try_get("measure_count")?,
        price: row.try_get("price")?,
    })
}

fn order_product_tool_from_row(row: &PgRow) -> StoreResult<OrderProductTool> {
    Ok(OrderProductTool {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        order_product_id: row.try_get("order_product_id")?,
        product_id: row.try_get("product_id")?,
        tool_id: row.try_get("tool_id")?,
        count: row.try_get("count")?,
        measure_count: row.try_get("measure_count")?,
        price: row.try_get("price")?,
    })
}

fn order_tool_from_row(row: &PgRow) -> StoreResult<OrderTool> {
    Ok(OrderTool {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        tool_id: row.try_get("tool_id")?,
        count: row.try_get("count")?,
        price: row.try_get("price")?,
    })
}

fn comment_from_row(row: &PgRow) -> StoreResult<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_rows<T>(rows: Vec<PgRow>, map: fn(&PgRow) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.iter().map(map).collect()
}

fn missing_row(table: &str, id: Uuid) -> FulfillmentError {
    FulfillmentError::Internal(format!("dangling reference to {table}: {id}"))
}

/// A stored enum column that does not parse is corrupt data, not a bad request
fn stored_enum<T>(column: &str, raw: &str) -> StoreResult<T>
where
    T: FromStr<Err = FulfillmentError>,
{
    raw.parse().map_err(|error: FulfillmentError| {
        tracing::error!(column, value = raw, error = %error, "Unreadable stored value");
        FulfillmentError::Internal(format!("unreadable {column} value: {raw:?}"))
    })
}

// ============================================================================
// Transaction
// ============================================================================

impl PgTransaction {
    async fn catalog_by_ids<T>(
        &mut self,
        table: &str,
        columns: &str,
        ids: Vec<Uuid>,
        map: fn(&PgRow) -> StoreResult<T>,
        id_of: fn(&T) -> Uuid,
    ) -> StoreResult<HashMap<Uuid, T>> {
        let rows = sqlx::query(&format!("SELECT {columns} FROM {table} WHERE id = ANY($1)"))
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(map_rows(rows, map)?
            .into_iter()
            .map(|item| (id_of(&item), item))
            .collect())
    }

    async fn order_rows<T>(
        &mut self,
        query: &str,
        order_id: Uuid,
        map: fn(&PgRow) -> StoreResult<T>,
    ) -> StoreResult<Vec<T>> {
        let rows = sqlx::query(query)
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await?;
        map_rows(rows, map)
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn find_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| product_from_row(&row))
            .transpose()
    }

    async fn find_level(&mut self, id: Uuid) -> StoreResult<Option<Level>> {
        sqlx::query(&format!("SELECT {LEVEL_COLUMNS} FROM levels WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| level_from_row(&row))
            .transpose()
    }

    async fn find_tool(&mut self, id: Uuid) -> StoreResult<Option<Tool>> {
        sqlx::query(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| tool_from_row(&row))
            .transpose()
    }

    async fn decrement_product_if_available(&mut self, id: Uuid, amount: i32) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE products
             SET quantity = quantity - $2,
                 is_active = (quantity - $2) > 0
             WHERE id = $1 AND quantity >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn decrement_tool_if_available(&mut self, id: Uuid, amount: i32) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE tools
             SET quantity = quantity - $2,
                 is_active = (quantity - $2) > 0
             WHERE id = $1 AND quantity >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.lat)
        .bind(order.long)
        .bind(&order.address)
        .bind(order.date)
        .bind(order.payment_type.as_str())
        .bind(order.with_delivery)
        .bind(&order.comment_to_delivery)
        .bind(&order.promo_code)
        .bind(order.total)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_order_product(&mut self, line: &OrderProduct) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO order_products
                (id, order_id, product_id, level_id, count, measure, measure_count, price)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(line.id)
        .bind(line.order_id)
        .bind(line.product_id)
        .bind(line.level_id)
        .bind(line.count)
        .bind(line.measure.as_str())
        .bind(line.measure_count)
        .bind(line.price)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_order_product_tool(&mut self, line: &OrderProductTool) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO order_product_tools
                (id, order_id, order_product_id, product_id, tool_id, count, measure_count, price)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(line.id)
        .bind(line.order_id)
        .bind(line.order_product_id)
        .bind(line.product_id)
        .bind(line.tool_id)
        .bind(line.count)
        .bind(line.measure_count)
        .bind(line.price)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_order_tool(&mut self, line: &OrderTool) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO order_tools (id, order_id, tool_id, count, price)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(line.id)
        .bind(line.order_id)
        .bind(line.tool_id)
        .bind(line.count)
        .bind(line.price)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order_total(&mut self, order_id: Uuid, total: Decimal) -> StoreResult<()> {
        sqlx::query("UPDATE orders SET total = $2 WHERE id = $1")
            .bind(order_id)
            .bind(total)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_order_for_update(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|row| order_from_row(&row))
        .transpose()
    }

    async fn set_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> StoreResult<()> {
        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn load_order_details(&mut self, order_id: Uuid) -> StoreResult<Option<OrderDetails>> {
        let order = match sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?
        {
            Some(row) => order_from_row(&row)?,
            None => return Ok(None),
        };

        let product_lines = self
            .order_rows(
                "SELECT id, order_id, product_id, level_id, count, measure, measure_count, price
                 FROM order_products WHERE order_id = $1 ORDER BY id",
                order_id,
                order_product_from_row,
            )
            .await?;
        let companion_lines = self
            .order_rows(
                "SELECT id, order_id, order_product_id, product_id, tool_id, count, measure_count, price
                 FROM order_product_tools WHERE order_id = $1 ORDER BY id",
                order_id,
                order_product_tool_from_row,
            )
            .await?;
        let tool_lines = self
            .order_rows(
                "SELECT id, order_id, tool_id, count, price
                 FROM order_tools WHERE order_id = $1 ORDER BY id",
                order_id,
                order_tool_from_row,
            )
            .await?;
        let comments = self
            .order_rows(
                "SELECT id, order_id, user_id, message, created_at
                 FROM comments WHERE order_id = $1 ORDER BY created_at",
                order_id,
                comment_from_row,
            )
            .await?;

        let masters: Vec<OrderMaster> =
            sqlx::query("SELECT order_id, master_id FROM order_masters WHERE order_id = $1")
                .bind(order_id)
                .fetch_all(&mut *self.tx)
                .await?
                .iter()
                .map(|row| {
                    Ok::<_, FulfillmentError>(OrderMaster {
                        order_id: row.try_get("order_id")?,
                        master_id: row.try_get("master_id")?,
                    })
                })
                .collect::<StoreResult<_>>()?;

        let products = self
            .catalog_by_ids(
                "products",
                PRODUCT_COLUMNS,
                product_lines.iter().map(|l| l.product_id).collect(),
                product_from_row,
                |p| p.id,
            )
            .await?;
        let levels = self
            .catalog_by_ids(
                "levels",
                LEVEL_COLUMNS,
                product_lines.iter().map(|l| l.level_id).collect(),
                level_from_row,
                |l| l.id,
            )
            .await?;
        let tools = self
            .catalog_by_ids(
                "tools",
                TOOL_COLUMNS,
                companion_lines
                    .iter()
                    .map(|l| l.tool_id)
                    .chain(tool_lines.iter().map(|l| l.tool_id))
                    .collect(),
                tool_from_row,
                |t| t.id,
            )
            .await?;

        let tool_for = |id: Uuid| tools.get(&id).cloned().ok_or_else(|| missing_row("tools", id));

        let mut order_products = Vec::with_capacity(product_lines.len());
        for line in product_lines {
            let product = products
                .get(&line.product_id)
                .cloned()
                .ok_or_else(|| missing_row("products", line.product_id))?;
            let level = levels
                .get(&line.level_id)
                .cloned()
                .ok_or_else(|| missing_row("levels", line.level_id))?;
            let companions = companion_lines
                .iter()
                .filter(|c| c.order_product_id == line.id)
                .map(|c| {
                    Ok::<_, FulfillmentError>(OrderProductToolDetails {
                        line: c.clone(),
                        tool: tool_for(c.tool_id)?,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;

            order_products.push(OrderProductDetails {
                line,
                product,
                level,
                tools: companions,
            });
        }

        let order_tools = tool_lines
            .into_iter()
            .map(|line| {
                let tool = tool_for(line.tool_id)?;
                Ok::<_, FulfillmentError>(OrderToolDetails { line, tool })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(OrderDetails {
            order,
            order_products,
            order_tools,
            masters,
            comments,
        }))
    }

    async fn delete_order(&mut self, order_id: Uuid) -> StoreResult<bool> {
        for table in [
            "order_product_tools",
            "order_products",
            "order_tools",
            "order_masters",
            "comments",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE order_id = $1"))
                .bind(order_id)
                .execute(&mut *self.tx)
                .await?;
        }

        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_masters(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Master>> {
        let rows = sqlx::query(&format!(
            "SELECT {MASTER_COLUMNS} FROM masters WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;
        map_rows(rows, master_from_row)
    }

    async fn attach_masters(&mut self, order_id: Uuid, master_ids: &[Uuid]) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO order_masters (order_id, master_id)
             SELECT $1, master_id FROM UNNEST($2::uuid[]) AS master_id
             ON CONFLICT (order_id, master_id) DO NOTHING",
        )
        .bind(order_id)
        .bind(master_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn activate_masters(&mut self, master_ids: &[Uuid]) -> StoreResult<()> {
        sqlx::query("UPDATE masters SET is_active = TRUE WHERE id = ANY($1)")
            .bind(master_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn lock_master(&mut self, id: Uuid) -> StoreResult<Option<Master>> {
        sqlx::query(&format!(
            "SELECT {MASTER_COLUMNS} FROM masters WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|row| master_from_row(&row))
        .transpose()
    }

    async fn insert_master_star(&mut self, star: &MasterStar) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO master_stars (id, master_id, user_id, star, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(star.id)
        .bind(star.master_id)
        .bind(star.user_id)
        .bind(star.star)
        .bind(star.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn average_master_star(&mut self, master_id: Uuid) -> StoreResult<Option<Decimal>> {
        let average: Option<Decimal> =
            sqlx::query_scalar("SELECT AVG(star) FROM master_stars WHERE master_id = $1")
                .bind(master_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(average)
    }

    async fn set_master_star(&mut self, master_id: Uuid, star: Decimal) -> StoreResult<()> {
        sqlx::query("UPDATE masters SET star = $2 WHERE id = $1")
            .bind(master_id)
            .bind(star)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Measure, PaymentType};

    #[test]
    fn test_stored_enums_parse() {
        let status: OrderStatus = stored_enum("status", "IN_PROGRESS").unwrap();
        assert_eq!(status, OrderStatus::InProgress);
        let measure: Measure = stored_enum("measure", "DAY").unwrap();
        assert_eq!(measure, Measure::Day);
    }

    #[test]
    fn test_corrupt_stored_enum_is_internal() {
        let result: StoreResult<OrderStatus> = stored_enum("status", "SHIPPED");
        match result {
            Err(error) => {
                assert!(matches!(error, FulfillmentError::Internal(_)));
                assert!(!error.is_client_error());
            }
            Ok(status) => panic!("expected an error, got {status}"),
        }

        let result: StoreResult<PaymentType> = stored_enum("payment_type", "BARTER");
        assert!(matches!(result, Err(FulfillmentError::Internal(_))));
    }
}
