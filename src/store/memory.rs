use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
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
// In-Memory Store
// ============================================================================
//
// Transactions are fully serialized: `begin` takes the store lock and works
// on a private copy which `commit` writes back. Dropping or rolling back a
// transaction leaves the shared state untouched.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub products: HashMap<Uuid, Product>,
    pub levels: HashMap<Uuid, Level>,
    pub tools: HashMap<Uuid, Tool>,
    pub masters: HashMap<Uuid, Master>,
    pub orders: HashMap<Uuid, Order>,
    pub order_products: Vec<OrderProduct>,
    pub order_product_tools: Vec<OrderProductTool>,
    pub order_tools: Vec<OrderTool>,
    pub order_masters: Vec<OrderMaster>,
    pub master_stars: Vec<MasterStar>,
    pub comments: Vec<Comment>,
}

/// Fault injection for tests; inert unless one of the `#[cfg(test)]` setters is used
#[derive(Clone, Default)]
struct Faults {
    commit_delay: Option<Duration>,
    commit_conflicts: Arc<AtomicU32>,
    /// Units another writer commits away from the next item this store decrements
    concurrent_take: Arc<AtomicI32>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit sleeps first
    #[cfg(test)]
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.faults.commit_delay = Some(delay);
        self
    }

    /// The next `count` commits fail with `Conflict` and discard their writes
    #[cfg(test)]
    pub fn inject_commit_conflicts(&self, count: u32) {
        self.faults.commit_conflicts.store(count, Ordering::SeqCst);
    }

    /// Right before the next stock decrement, a concurrent order commits a
    /// reservation of `units` of the same item
    #[cfg(test)]
    pub fn take_on_next_decrement(&self, units: i32) {
        self.faults.concurrent_take.store(units, Ordering::SeqCst);
    }

    pub async fn add_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn add_level(&self, level: Level) {
        self.state.lock().await.levels.insert(level.id, level);
    }

    pub async fn add_tool(&self, tool: Tool) {
        self.state.lock().await.tools.insert(tool.id, tool);
    }

    pub async fn add_master(&self, master: Master) {
        self.state.lock().await.masters.insert(master.id, master);
    }

    pub async fn add_comment(&self, comment: Comment) {
        self.state.lock().await.comments.push(comment);
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl FulfillmentStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Faults,
}

/// Conditional decrement of one stock record
fn withdraw(quantity: &mut i32, is_active: &mut bool, amount: i32) -> bool {
    if *quantity < amount {
        return false;
    }
    *quantity -= amount;
    *is_active = *quantity > 0;
    true
}

fn missing_reference(table: &str, id: Uuid) -> FulfillmentError {
    FulfillmentError::Internal(format!("foreign key violation on {table}: {id}"))
}

impl InMemoryTransaction {
    fn require_order(&self, order_id: Uuid) -> StoreResult<()> {
        if self.working.orders.contains_key(&order_id) {
            Ok(())
        } else {
            Err(missing_reference("orders", order_id))
        }
    }

    fn details(&self, order: &Order) -> StoreResult<OrderDetails> {
        let state = &self.working;

        let tool = |id: Uuid| {
            state
                .tools
                .get(&id)
                .cloned()
                .ok_or_else(|| missing_reference("tools", id))
        };

        let mut order_products = Vec::new();
        for line in state.order_products.iter().filter(|l| l.order_id == order.id) {
            let product = state
                .products
                .get(&line.product_id)
                .cloned()
                .ok_or_else(|| missing_reference("products", line.product_id))?;
            let level = state
                .levels
                .get(&line.level_id)
                .cloned()
                .ok_or_else(|| missing_reference("levels", line.level_id))?;

            let mut tools = Vec::new();
            for companion in state
                .order_product_tools
                .iter()
                .filter(|t| t.order_product_id == line.id)
            {
                tools.push(OrderProductToolDetails {
                    line: companion.clone(),
                    tool: tool(companion.tool_id)?,
                });
            }

            order_products.push(OrderProductDetails {
                line: line.clone(),
                product,
                level,
                tools,
            });
        }

        let mut order_tools = Vec::new();
        for line in state.order_tools.iter().filter(|l| l.order_id == order.id) {
            order_tools.push(OrderToolDetails {
                line: line.clone(),
                tool: tool(line.tool_id)?,
            });
        }

        Ok(OrderDetails {
            order: order.clone(),
            order_products,
            order_tools,
            masters: state
                .order_masters
                .iter()
                .filter(|m| m.order_id == order.id)
                .cloned()
                .collect(),
            comments: state
                .comments
                .iter()
                .filter(|c| c.order_id == order.id)
                .cloned()
                .collect(),
        })
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn find_level(&mut self, id: Uuid) -> StoreResult<Option<Level>> {
        Ok(self.working.levels.get(&id).cloned())
    }

    async fn find_tool(&mut self, id: Uuid) -> StoreResult<Option<Tool>> {
        Ok(self.working.tools.get(&id).cloned())
    }

    async fn decrement_product_if_available(&mut self, id: Uuid, amount: i32) -> StoreResult<bool> {
        let taken = self.faults.concurrent_take.swap(0, Ordering::SeqCst);
        if taken > 0 {
            for state in [&mut *self.guard, &mut self.working] {
                if let Some(product) = state.products.get_mut(&id) {
                    withdraw(&mut product.quantity, &mut product.is_active, taken);
                }
            }
        }

        Ok(match self.working.products.get_mut(&id) {
            Some(product) => withdraw(&mut product.quantity, &mut product.is_active, amount),
            None => false,
        })
    }

    async fn decrement_tool_if_available(&mut self, id: Uuid, amount: i32) -> StoreResult<bool> {
        let taken = self.faults.concurrent_take.swap(0, Ordering::SeqCst);
        if taken > 0 {
            for state in [&mut *self.guard, &mut self.working] {
                if let Some(tool) = state.tools.get_mut(&id) {
                    withdraw(&mut tool.quantity, &mut tool.is_active, taken);
                }
            }
        }

        Ok(match self.working.tools.get_mut(&id) {
            Some(tool) => withdraw(&mut tool.quantity, &mut tool.is_active, amount),
            None => false,
        })
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_order_product(&mut self, line: &OrderProduct) -> StoreResult<()> {
        self.require_order(line.order_id)?;
        if !self.working.products.contains_key(&line.product_id) {
            return Err(missing_reference("products", line.product_id));
        }
        if !self.working.levels.contains_key(&line.level_id) {
            return Err(missing_reference("levels", line.level_id));
        }
        self.working.order_products.push(line.clone());
        Ok(())
    }

    async fn insert_order_product_tool(&mut self, line: &OrderProductTool) -> StoreResult<()> {
        if !self
            .working
            .order_products
            .iter()
            .any(|p| p.id == line.order_product_id)
        {
            return Err(missing_reference("order_products", line.order_product_id));
        }
        if !self.working.tools.contains_key(&line.tool_id) {
            return Err(missing_reference("tools", line.tool_id));
        }
        self.working.order_product_tools.push(line.clone());
        Ok(())
    }

    async fn insert_order_tool(&mut self, line: &OrderTool) -> StoreResult<()> {
        self.require_order(line.order_id)?;
        if !self.working.tools.contains_key(&line.tool_id) {
            return Err(missing_reference("tools", line.tool_id));
        }
        self.working.order_tools.push(line.clone());
        Ok(())
    }

    async fn update_order_total(&mut self, order_id: Uuid, total: Decimal) -> StoreResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| missing_reference("orders", order_id))?;
        order.total = total;
        Ok(())
    }

    async fn find_order_for_update(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn set_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> StoreResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| missing_reference("orders", order_id))?;
        order.status = status;
        Ok(())
    }

    async fn load_order_details(&mut self, order_id: Uuid) -> StoreResult<Option<OrderDetails>> {
        match self.working.orders.get(&order_id) {
            Some(order) => self.details(order).map(Some),
            None => Ok(None),
        }
    }

    async fn delete_order(&mut self, order_id: Uuid) -> StoreResult<bool> {
        let state = &mut self.working;
        if state.orders.remove(&order_id).is_none() {
            return Ok(false);
        }

        state.order_product_tools.retain(|t| t.order_id != order_id);
        state.order_products.retain(|p| p.order_id != order_id);
        state.order_tools.retain(|t| t.order_id != order_id);
        state.order_masters.retain(|m| m.order_id != order_id);
        state.comments.retain(|c| c.order_id != order_id);
        Ok(true)
    }

    async fn find_masters(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Master>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.masters.get(id).cloned())
            .collect())
    }

    async fn attach_masters(&mut self, order_id: Uuid, master_ids: &[Uuid]) -> StoreResult<()> {
        self.require_order(order_id)?;
        for master_id in master_ids {
            if !self.working.masters.contains_key(master_id) {
                return Err(missing_reference("masters", *master_id));
            }
            let attached = self
                .working
                .order_masters
                .iter()
                .any(|m| m.order_id == order_id && m.master_id == *master_id);
            if !attached {
                self.working.order_masters.push(OrderMaster {
                    order_id,
                    master_id: *master_id,
                });
            }
        }
        Ok(())
    }

    async fn activate_masters(&mut self, master_ids: &[Uuid]) -> StoreResult<()> {
        for id in master_ids {
            if let Some(master) = self.working.masters.get_mut(id) {
                master.is_active = true;
            }
        }
        Ok(())
    }

    async fn lock_master(&mut self, id: Uuid) -> StoreResult<Option<Master>> {
        Ok(self.working.masters.get(&id).cloned())
    }

    async fn insert_master_star(&mut self, star: &MasterStar) -> StoreResult<()> {
        if !self.working.masters.contains_key(&star.master_id) {
            return Err(missing_reference("masters", star.master_id));
        }
        self.working.master_stars.push(star.clone());
        Ok(())
    }

    async fn average_master_star(&mut self, master_id: Uuid) -> StoreResult<Option<Decimal>> {
        let (sum, count) = self
            .working
            .master_stars
            .iter()
            .filter(|s| s.master_id == master_id)
            .fold((Decimal::ZERO, 0i64), |(sum, count), s| {
                (sum + Decimal::from(s.star), count + 1)
            });

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(sum / Decimal::from(count)))
    }

    async fn set_master_star(&mut self, master_id: Uuid, star: Decimal) -> StoreResult<()> {
        let master = self
            .working
            .masters
            .get_mut(&master_id)
            .ok_or_else(|| missing_reference("masters", master_id))?;
        master.star = Some(star);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTransaction {
            mut guard,
            working,
            faults,
        } = *self;

        if let Some(delay) = faults.commit_delay {
            tokio::time::sleep(delay).await;
        }

        let injected = faults
            .commit_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(FulfillmentError::Conflict(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
