// ============================================================================
// Fulfillment Store - Transactional Persistence Layer
// ============================================================================
//
// Every core operation runs against one `StoreTransaction`: it either
// commits every write it made or none of them. Two implementations:
// - PgStore        (sqlx / PostgreSQL, row locks + conditional updates)
// - InMemoryStore  (serialized copy-on-commit transactions)
//
// ============================================================================

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::errors::FulfillmentError;
use crate::domain::order::OrderStatus;
use crate::models::{
    Level, Master, MasterStar, Order, OrderDetails, OrderProduct, OrderProductTool, OrderTool,
    Product, Tool,
};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, FulfillmentError>;

#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// Unit of work over the catalog and the order graph
#[async_trait]
pub trait StoreTransaction: Send {
    // Catalog lookups
    async fn find_product(&mut self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn find_level(&mut self, id: Uuid) -> StoreResult<Option<Level>>;
    async fn find_tool(&mut self, id: Uuid) -> StoreResult<Option<Tool>>;

    /// Subtract `amount` only if at least that much is in stock; refreshes `is_active`.
    /// Returns false when nothing was changed.
    async fn decrement_product_if_available(&mut self, id: Uuid, amount: i32) -> StoreResult<bool>;
    async fn decrement_tool_if_available(&mut self, id: Uuid, amount: i32) -> StoreResult<bool>;

    // Order graph
    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;
    async fn insert_order_product(&mut self, line: &OrderProduct) -> StoreResult<()>;
    async fn insert_order_product_tool(&mut self, line: &OrderProductTool) -> StoreResult<()>;
    async fn insert_order_tool(&mut self, line: &OrderTool) -> StoreResult<()>;
    async fn update_order_total(&mut self, order_id: Uuid, total: Decimal) -> StoreResult<()>;

    /// Loads the order and holds it against concurrent status changes
    async fn find_order_for_update(&mut self, order_id: Uuid) -> StoreResult<Option<Order>>;
    async fn set_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> StoreResult<()>;
    async fn load_order_details(&mut self, order_id: Uuid) -> StoreResult<Option<OrderDetails>>;
    /// Removes the order and every child row; false if it did not exist
    async fn delete_order(&mut self, order_id: Uuid) -> StoreResult<bool>;

    // Masters
    async fn find_masters(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Master>>;
    /// Already attached pairs are left as they are
    async fn attach_masters(&mut self, order_id: Uuid, master_ids: &[Uuid]) -> StoreResult<()>;
    async fn activate_masters(&mut self, master_ids: &[Uuid]) -> StoreResult<()>;

    /// Loads the master and serializes rating writers for it until commit
    async fn lock_master(&mut self, id: Uuid) -> StoreResult<Option<Master>>;
    async fn insert_master_star(&mut self, star: &MasterStar) -> StoreResult<()>;
    async fn average_master_star(&mut self, master_id: Uuid) -> StoreResult<Option<Decimal>>;
    async fn set_master_star(&mut self, master_id: Uuid, star: Decimal) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Commit on success, roll back on failure
pub async fn finish<T>(
    tx: Box<dyn StoreTransaction>,
    result: StoreResult<T>,
) -> StoreResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::error!(
                    error = %rollback_error,
                    "Rollback failed; the transaction is discarded on drop"
                );
            }
            Err(error)
        }
    }
}
