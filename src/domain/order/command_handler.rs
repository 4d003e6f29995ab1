use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::aggregate::OrderDraft;
use super::commands::{AssignMasters, CreateOrder, UpdateOrderStatus};
use super::pricing::PriceBreakdown;
use crate::domain::errors::FulfillmentError;
use crate::models::{Level, OrderDetails, Product, Tool};
use crate::store::{finish, FulfillmentStore, StoreResult, StoreTransaction};

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → catalog lookups + stock reservation → order graph
// Every public operation is one store transaction.
//
// ============================================================================

/// A freshly created order with the figures its total was computed from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order: OrderDetails,
    pub pricing: PriceBreakdown,
}

#[derive(Clone)]
pub struct OrderCommandHandler {
    store: Arc<dyn FulfillmentStore>,
}

impl OrderCommandHandler {
    pub fn new(store: Arc<dyn FulfillmentStore>) -> Self {
        Self { store }
    }

    /// Reserve stock, persist the order graph and price it, all or nothing
    pub async fn create_order(
        &self,
        command: &CreateOrder,
        user_id: Uuid,
    ) -> StoreResult<PlacedOrder> {
        command.validate()?;

        let mut tx = self.store.begin().await?;
        let result = create_in(tx.as_mut(), command, user_id).await;
        finish(tx, result).await
    }

    /// Attach masters and start the order; fails without changes if any id is unknown
    pub async fn assign_masters(&self, command: &AssignMasters) -> StoreResult<OrderDetails> {
        command.validate()?;

        let mut tx = self.store.begin().await?;
        let result = assign_in(tx.as_mut(), command).await;
        finish(tx, result).await
    }

    pub async fn update_status(&self, command: &UpdateOrderStatus) -> StoreResult<OrderDetails> {
        let mut tx = self.store.begin().await?;
        let result = update_status_in(tx.as_mut(), command).await;
        finish(tx, result).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> StoreResult<OrderDetails> {
        let mut tx = self.store.begin().await?;
        let result = load_details(tx.as_mut(), order_id).await;
        finish(tx, result).await
    }

    /// Removes the order with all of its line items, master links and comments
    pub async fn delete_order(&self, order_id: Uuid) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        let result = match tx.delete_order(order_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(FulfillmentError::not_found("Order", order_id)),
            Err(error) => Err(error),
        };
        let outcome = finish(tx, result).await;

        if outcome.is_ok() {
            tracing::info!(order_id = %order_id, "Order deleted");
        }
        outcome
    }
}

// ============================================================================
// Transaction Bodies
// ============================================================================

async fn create_in(
    tx: &mut dyn StoreTransaction,
    command: &CreateOrder,
    user_id: Uuid,
) -> StoreResult<PlacedOrder> {
    let order_id = Uuid::new_v4();
    let mut draft = OrderDraft::new(order_id, user_id, command);

    tx.insert_order(draft.order()).await?;

    for request in &command.order_products {
        let product = find_product(tx, request.product_id).await?;
        let level = find_level(tx, request.level_id).await?;
        reserve_product(tx, &product, request.count).await?;

        let line = draft.add_product_line(request, &product, &level)?;
        tx.insert_order_product(&line).await?;

        tracing::debug!(
            order_id = %order_id,
            product_id = %product.id,
            level_id = %level.id,
            count = line.count,
            unit_price = %line.price,
            "Reserved product line"
        );

        for tool_request in &request.tools {
            let tool = find_tool(tx, tool_request.tool_id).await?;
            reserve_tool(tx, &tool, tool_request.count).await?;

            let companion = draft.add_companion_tool(&line, tool_request, &tool)?;
            tx.insert_order_product_tool(&companion).await?;

            tracing::debug!(
                order_id = %order_id,
                tool_id = %tool.id,
                count = companion.count,
                unit_price = %companion.price,
                "Reserved companion tool"
            );
        }
    }

    for request in &command.order_tools {
        let tool = find_tool(tx, request.tool_id).await?;
        reserve_tool(tx, &tool, request.count).await?;

        let line = draft.add_standalone_tool(request, &tool);
        tx.insert_order_tool(&line).await?;

        tracing::debug!(
            order_id = %order_id,
            tool_id = %tool.id,
            count = line.count,
            "Reserved standalone tool"
        );
    }

    let pricing = draft.price()?;
    tx.update_order_total(order_id, pricing.total).await?;

    let order = load_details(tx, order_id).await?;

    tracing::info!(
        order_id = %order_id,
        user_id = %user_id,
        line_items = command.line_item_count(),
        subtotal = %pricing.subtotal,
        total = %pricing.total,
        "✅ Order created"
    );

    Ok(PlacedOrder { order, pricing })
}

async fn assign_in(tx: &mut dyn StoreTransaction, command: &AssignMasters) -> StoreResult<OrderDetails> {
    let order = tx
        .find_order_for_update(command.order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("Order", command.order_id))?;

    let found = tx.find_masters(&command.master_ids).await?;
    if found.len() != command.master_ids.len() {
        let missing: Vec<Uuid> = command
            .master_ids
            .iter()
            .filter(|id| !found.iter().any(|m| m.id == **id))
            .copied()
            .collect();

        tracing::warn!(
            order_id = %command.order_id,
            missing = ?missing,
            "Master assignment rejected"
        );
        return Err(FulfillmentError::PartialNotFound {
            entity: "Master",
            missing,
        });
    }

    let next = order.status.after_master_assignment()?;

    tx.attach_masters(order.id, &command.master_ids).await?;
    tx.activate_masters(&command.master_ids).await?;
    tx.set_order_status(order.id, next).await?;

    tracing::info!(
        order_id = %order.id,
        masters = command.master_ids.len(),
        from = %order.status,
        to = %next,
        "✅ Masters assigned"
    );

    load_details(tx, order.id).await
}

async fn update_status_in(
    tx: &mut dyn StoreTransaction,
    command: &UpdateOrderStatus,
) -> StoreResult<OrderDetails> {
    let order = tx
        .find_order_for_update(command.order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("Order", command.order_id))?;

    let next = order.status.transition_to(command.status)?;
    tx.set_order_status(order.id, next).await?;

    tracing::info!(
        order_id = %order.id,
        from = %order.status,
        to = %next,
        "Order status updated"
    );

    load_details(tx, order.id).await
}

async fn load_details(tx: &mut dyn StoreTransaction, order_id: Uuid) -> StoreResult<OrderDetails> {
    tx.load_order_details(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("Order", order_id))
}

// ============================================================================
// Catalog Resolution & Stock Reservation
// ============================================================================

async fn find_product(tx: &mut dyn StoreTransaction, id: Uuid) -> StoreResult<Product> {
    tx.find_product(id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("Product", id))
}

async fn find_level(tx: &mut dyn StoreTransaction, id: Uuid) -> StoreResult<Level> {
    tx.find_level(id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("Level", id))
}

async fn find_tool(tx: &mut dyn StoreTransaction, id: Uuid) -> StoreResult<Tool> {
    tx.find_tool(id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("Tool", id))
}

fn check_stock(entity: &'static str, id: Uuid, available: i32, requested: i32) -> StoreResult<()> {
    if available < requested {
        tracing::warn!(
            entity,
            id = %id,
            requested,
            available,
            "Insufficient stock"
        );
        return Err(FulfillmentError::InsufficientStock {
            entity,
            id,
            requested,
            available,
        });
    }
    Ok(())
}

fn lost_race(entity: &str, id: Uuid) -> FulfillmentError {
    FulfillmentError::Conflict(format!("stock of {entity} {id} changed during reservation"))
}

async fn reserve_product(tx: &mut dyn StoreTransaction, product: &Product, count: i32) -> StoreResult<()> {
    check_stock("Product", product.id, product.quantity, count)?;
    if !tx.decrement_product_if_available(product.id, count).await? {
        return Err(lost_race("Product", product.id));
    }
    Ok(())
}

async fn reserve_tool(tx: &mut dyn StoreTransaction, tool: &Tool, count: i32) -> StoreResult<()> {
    check_stock("Tool", tool.id, tool.quantity, count)?;
    if !tx.decrement_tool_if_available(tool.id, count).await? {
        return Err(lost_race("Tool", tool.id));
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
