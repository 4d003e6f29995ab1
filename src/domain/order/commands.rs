use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::value_objects::{Measure, OrderStatus, PaymentType};
use crate::domain::errors::FulfillmentError;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    pub lat: f64,
    pub long: f64,
    pub address: String,
    pub date: DateTime<Utc>,
    pub payment_type: PaymentType,
    pub with_delivery: bool,
    pub comment_to_delivery: Option<String>,
    pub promo_code: Option<String>,
    #[serde(default)]
    pub order_products: Vec<OrderProductRequest>,
    #[serde(default)]
    pub order_tools: Vec<OrderToolRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProductRequest {
    pub product_id: Uuid,
    pub level_id: Uuid,
    pub count: i32,
    pub measure: Measure,
    pub measure_count: i32,
    #[serde(default)]
    pub tools: Vec<CompanionToolRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionToolRequest {
    pub tool_id: Uuid,
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderToolRequest {
    pub tool_id: Uuid,
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignMasters {
    pub order_id: Uuid,
    pub master_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatus {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

/// Largest quantity of one item on a single line
pub const MAX_COUNT: i32 = 10_000;
/// Longest rental on a single line, in hours or days
pub const MAX_MEASURE_COUNT: i32 = 10_000;

fn ensure_in_range(field: &str, value: i32, max: i32) -> Result<(), FulfillmentError> {
    if value <= 0 {
        return Err(FulfillmentError::validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    if value > max {
        return Err(FulfillmentError::validation(format!(
            "{field} must be at most {max}, got {value}"
        )));
    }
    Ok(())
}

impl CreateOrder {
    /// Shape checks that need no catalog access
    pub fn validate(&self) -> Result<(), FulfillmentError> {
        if self.order_products.is_empty() && self.order_tools.is_empty() {
            return Err(FulfillmentError::validation(
                "order must contain at least one product or tool",
            ));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(FulfillmentError::validation(format!(
                "lat out of range: {}",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.long) {
            return Err(FulfillmentError::validation(format!(
                "long out of range: {}",
                self.long
            )));
        }
        if self.address.trim().is_empty() {
            return Err(FulfillmentError::validation("address cannot be empty"));
        }

        for line in &self.order_products {
            ensure_in_range("count", line.count, MAX_COUNT)?;
            ensure_in_range("measure_count", line.measure_count, MAX_MEASURE_COUNT)?;
            for tool in &line.tools {
                ensure_in_range("tool count", tool.count, MAX_COUNT)?;
            }
        }
        for tool in &self.order_tools {
            ensure_in_range("tool count", tool.count, MAX_COUNT)?;
        }

        Ok(())
    }

    pub fn line_item_count(&self) -> usize {
        self.order_products
            .iter()
            .map(|line| 1 + line.tools.len())
            .sum::<usize>()
            + self.order_tools.len()
    }
}

impl AssignMasters {
    pub fn validate(&self) -> Result<(), FulfillmentError> {
        if self.master_ids.is_empty() {
            return Err(FulfillmentError::validation("master_ids cannot be empty"));
        }

        let mut seen = HashSet::with_capacity(self.master_ids.len());
        for id in &self.master_ids {
            if !seen.insert(id) {
                return Err(FulfillmentError::validation(format!(
                    "duplicate master id: {id}"
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> CreateOrder {
        CreateOrder {
            lat: 41.31,
            long: 69.24,
            address: "12 Amir Temur St".to_string(),
            date: Utc::now(),
            payment_type: PaymentType::Card,
            with_delivery: false,
            comment_to_delivery: None,
            promo_code: None,
            order_products: vec![OrderProductRequest {
                product_id: Uuid::new_v4(),
                level_id: Uuid::new_v4(),
                count: 1,
                measure: Measure::Day,
                measure_count: 2,
                tools: vec![CompanionToolRequest {
                    tool_id: Uuid::new_v4(),
                    count: 1,
                }],
            }],
            order_tools: vec![],
        }
    }

    #[test]
    fn test_valid_order_passes() {
        let order = sample_order();
        assert!(order.validate().is_ok());
        assert_eq!(order.line_item_count(), 2);
    }

    #[test]
    fn test_empty_order_is_rejected() {
        let mut order = sample_order();
        order.order_products.clear();
        assert!(matches!(
            order.validate(),
            Err(FulfillmentError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_non_positive_counts_are_rejected() {
        let mut order = sample_order();
        order.order_products[0].count = 0;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.order_products[0].measure_count = -1;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.order_products[0].tools[0].count = 0;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.order_tools.push(OrderToolRequest {
            tool_id: Uuid::new_v4(),
            count: -3,
        });
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_oversized_counts_are_rejected() {
        let mut order = sample_order();
        order.order_products[0].measure_count = MAX_MEASURE_COUNT;
        order.order_products[0].count = MAX_COUNT;
        assert!(order.validate().is_ok());

        let mut order = sample_order();
        order.order_products[0].measure_count = i32::MAX;
        assert!(matches!(
            order.validate(),
            Err(FulfillmentError::ValidationFailed(_))
        ));

        let mut order = sample_order();
        order.order_products[0].count = MAX_COUNT + 1;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.order_products[0].tools[0].count = i32::MAX;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.order_tools.push(OrderToolRequest {
            tool_id: Uuid::new_v4(),
            count: MAX_COUNT + 1,
        });
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_coordinates_and_address_are_checked() {
        let mut order = sample_order();
        order.lat = 91.0;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.long = -181.0;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.address = "  ".to_string();
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_missing_tool_lists_deserialize_as_empty() {
        let json = serde_json::json!({
            "lat": 1.0,
            "long": 2.0,
            "address": "x",
            "date": "2023-10-01T12:00:00Z",
            "payment_type": "CASH",
            "with_delivery": true,
            "comment_to_delivery": null,
            "promo_code": null,
            "order_products": [{
                "product_id": Uuid::new_v4(),
                "level_id": Uuid::new_v4(),
                "count": 2,
                "measure": "HOUR",
                "measure_count": 3
            }]
        });

        let order: CreateOrder = serde_json::from_value(json).unwrap();
        assert!(order.order_tools.is_empty());
        assert!(order.order_products[0].tools.is_empty());
        assert_eq!(order.payment_type, PaymentType::Cash);
    }

    #[test]
    fn test_assign_masters_requires_unique_ids() {
        let id = Uuid::new_v4();
        let command = AssignMasters {
            order_id: Uuid::new_v4(),
            master_ids: vec![id, id],
        };
        assert!(command.validate().is_err());

        let command = AssignMasters {
            order_id: Uuid::new_v4(),
            master_ids: vec![],
        };
        assert!(command.validate().is_err());

        let command = AssignMasters {
            order_id: Uuid::new_v4(),
            master_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        assert!(command.validate().is_ok());
    }
}
