use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::commands::{CompanionToolRequest, CreateOrder, OrderProductRequest, OrderToolRequest};
use super::pricing::{
    companion_tool_price, price_order, unit_price, CompanionToolLine, PriceBreakdown,
    PricingInput, ProductLine, Rates, StandaloneToolLine,
};
use super::value_objects::OrderStatus;
use crate::domain::errors::FulfillmentError;
use crate::models::{Level, Order, OrderProduct, OrderProductTool, OrderTool, Product, Tool};

// ============================================================================
// Order Draft - assembles the order graph while stock is reserved
// ============================================================================
//
// The command handler resolves catalog records and reserves stock; the
// draft turns each resolved line into its persisted row and records the
// figures the final price is computed from. Prices are taken from the
// same records the rows were built from, so the stored snapshots and the
// order total always agree.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderDraft {
    order: Order,
    pricing: PricingInput,
}

impl OrderDraft {
    pub fn new(order_id: Uuid, user_id: Uuid, command: &CreateOrder) -> Self {
        let order = Order {
            id: order_id,
            user_id,
            lat: command.lat,
            long: command.long,
            address: command.address.clone(),
            date: command.date,
            payment_type: command.payment_type,
            with_delivery: command.with_delivery,
            comment_to_delivery: command.comment_to_delivery.clone(),
            promo_code: command.promo_code.clone(),
            total: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };

        Self {
            order,
            pricing: PricingInput {
                with_delivery: command.with_delivery,
                promo_code: command.promo_code.clone(),
                ..Default::default()
            },
        }
    }

    /// Order row as first inserted: zero total, pending
    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn add_product_line(
        &mut self,
        request: &OrderProductRequest,
        product: &Product,
        level: &Level,
    ) -> Result<OrderProduct, FulfillmentError> {
        let line = ProductLine {
            product: Rates::new(product.price_hourly, product.price_daily),
            level: Rates::new(level.price_hourly, level.price_daily),
            measure: request.measure,
            measure_count: request.measure_count,
            count: request.count,
        };
        let price = unit_price(&line)?;
        self.pricing.products.push(line);

        Ok(OrderProduct {
            id: Uuid::new_v4(),
            order_id: self.order.id,
            product_id: product.id,
            level_id: level.id,
            count: request.count,
            measure: request.measure,
            measure_count: request.measure_count,
            price,
        })
    }

    pub fn add_companion_tool(
        &mut self,
        parent: &OrderProduct,
        request: &CompanionToolRequest,
        tool: &Tool,
    ) -> Result<OrderProductTool, FulfillmentError> {
        let price = companion_tool_price(tool.price, parent.measure_count)?;
        self.pricing.companion_tools.push(CompanionToolLine {
            price: tool.price,
            measure_count: parent.measure_count,
            count: request.count,
        });

        Ok(OrderProductTool {
            id: Uuid::new_v4(),
            order_id: self.order.id,
            order_product_id: parent.id,
            product_id: parent.product_id,
            tool_id: tool.id,
            count: request.count,
            measure_count: parent.measure_count,
            price,
        })
    }

    pub fn add_standalone_tool(&mut self, request: &OrderToolRequest, tool: &Tool) -> OrderTool {
        self.pricing.standalone_tools.push(StandaloneToolLine {
            price: tool.price,
            count: request.count,
        });

        OrderTool {
            id: Uuid::new_v4(),
            order_id: self.order.id,
            tool_id: tool.id,
            count: request.count,
            price: tool.price,
        }
    }

    pub fn price(&self) -> Result<PriceBreakdown, FulfillmentError> {
        price_order(&self.pricing)
    }
}

// ============================================================================
// Lifecycle Rules
// ============================================================================

impl OrderStatus {
    /// Status after masters are attached: the first assignment starts the work
    pub fn after_master_assignment(self) -> Result<OrderStatus, FulfillmentError> {
        if self.is_terminal() {
            return Err(FulfillmentError::InvalidStatusTransition {
                from: self,
                to: OrderStatus::InProgress,
            });
        }
        Ok(OrderStatus::InProgress)
    }

    /// Explicit status update; `InProgress` is only reachable by assigning masters
    pub fn transition_to(self, next: OrderStatus) -> Result<OrderStatus, FulfillmentError> {
        match (self, next) {
            (OrderStatus::Pending, OrderStatus::Cancelled)
            | (OrderStatus::InProgress, OrderStatus::Completed)
            | (OrderStatus::InProgress, OrderStatus::Cancelled) => Ok(next),
            _ => Err(FulfillmentError::InvalidStatusTransition {
                from: self,
                to: next,
            }),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Measure, PaymentType};

    fn product(daily: i64) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Concrete mixer".to_string(),
            quantity: 4,
            price_hourly: Decimal::from(6),
            price_daily: Decimal::from(daily),
            is_active: true,
        }
    }

    fn level(daily: i64) -> Level {
        Level {
            id: Uuid::new_v4(),
            name: "Senior".to_string(),
            price_hourly: Decimal::from(3),
            price_daily: Decimal::from(daily),
        }
    }

    fn tool(price: i64) -> Tool {
        Tool {
            id: Uuid::new_v4(),
            name: "Drill".to_string(),
            quantity: 10,
            price: Decimal::from(price),
            is_active: true,
        }
    }

    fn command() -> CreateOrder {
        CreateOrder {
            lat: 0.0,
            long: 0.0,
            address: "Somewhere 1".to_string(),
            date: Utc::now(),
            payment_type: PaymentType::Cash,
            with_delivery: false,
            comment_to_delivery: Some("Ring twice".to_string()),
            promo_code: None,
            order_products: vec![],
            order_tools: vec![],
        }
    }

    #[test]
    fn test_new_draft_is_pending_with_zero_total() {
        let user_id = Uuid::new_v4();
        let draft = OrderDraft::new(Uuid::new_v4(), user_id, &command());

        assert_eq!(draft.order().status, OrderStatus::Pending);
        assert_eq!(draft.order().total, Decimal::ZERO);
        assert_eq!(draft.order().user_id, user_id);
        assert_eq!(draft.order().comment_to_delivery.as_deref(), Some("Ring twice"));
    }

    #[test]
    fn test_draft_snapshots_match_final_price() {
        let mut draft = OrderDraft::new(Uuid::new_v4(), Uuid::new_v4(), &command());
        let product = product(50);
        let level = level(20);
        let drill = tool(8);
        let saw = tool(15);

        let request = OrderProductRequest {
            product_id: product.id,
            level_id: level.id,
            count: 1,
            measure: Measure::Day,
            measure_count: 2,
            tools: vec![CompanionToolRequest {
                tool_id: drill.id,
                count: 2,
            }],
        };

        let line = draft.add_product_line(&request, &product, &level).unwrap();
        assert_eq!(line.price, Decimal::from(140));
        assert_eq!(line.order_id, draft.order().id);

        let companion = draft
            .add_companion_tool(&line, &request.tools[0], &drill)
            .unwrap();
        assert_eq!(companion.price, Decimal::from(8));
        assert_eq!(companion.measure_count, 2);
        assert_eq!(companion.order_product_id, line.id);

        let standalone = draft.add_standalone_tool(
            &OrderToolRequest {
                tool_id: saw.id,
                count: 1,
            },
            &saw,
        );
        assert_eq!(standalone.price, Decimal::from(15));

        // 140 + 8*2 + 15 = 171
        let price = draft.price().unwrap();
        assert_eq!(price.subtotal, Decimal::from(171));
        assert_eq!(
            price.subtotal,
            line.price * Decimal::from(line.count)
                + companion.price * Decimal::from(companion.count)
                + standalone.price * Decimal::from(standalone.count)
        );
    }

    #[test]
    fn test_assignment_starts_pending_order() {
        assert_eq!(
            OrderStatus::Pending.after_master_assignment().unwrap(),
            OrderStatus::InProgress
        );
        assert_eq!(
            OrderStatus::InProgress.after_master_assignment().unwrap(),
            OrderStatus::InProgress
        );
    }

    #[test]
    fn test_assignment_rejected_for_terminal_orders() {
        for status in [OrderStatus::Completed, OrderStatus::Cancelled] {
            let result = status.after_master_assignment();
            assert!(matches!(
                result,
                Err(FulfillmentError::InvalidStatusTransition { .. })
            ));
        }
    }

    #[test]
    fn test_explicit_transitions() {
        assert!(OrderStatus::Pending.transition_to(OrderStatus::Cancelled).is_ok());
        assert!(OrderStatus::InProgress.transition_to(OrderStatus::Completed).is_ok());
        assert!(OrderStatus::InProgress.transition_to(OrderStatus::Cancelled).is_ok());

        assert!(OrderStatus::Pending.transition_to(OrderStatus::InProgress).is_err());
        assert!(OrderStatus::Pending.transition_to(OrderStatus::Completed).is_err());
        assert!(OrderStatus::Completed.transition_to(OrderStatus::Cancelled).is_err());
        assert!(OrderStatus::Cancelled.transition_to(OrderStatus::Pending).is_err());
        assert!(OrderStatus::InProgress.transition_to(OrderStatus::InProgress).is_err());
    }
}
