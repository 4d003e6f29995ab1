use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::{Measure, OrderStatus, PaymentType};

// ============================================================================
// Catalog Records
// ============================================================================
//
// Owned by the catalog; the fulfillment core reads them and only ever
// writes `quantity`/`is_active` (products, tools), `is_active` and `star`
// (masters).
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub price_hourly: Decimal,
    pub price_daily: Decimal,
    pub is_active: bool,
}

/// Skill tier billed on top of a product
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Level {
    pub id: Uuid,
    pub name: String,
    pub price_hourly: Decimal,
    pub price_daily: Decimal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tool {
    pub id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub is_active: bool,
}

/// Service provider
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Master {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    /// Cached mean of every `MasterStar` row for this master
    pub star: Option<Decimal>,
}

// ============================================================================
// Order Graph
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lat: f64,
    pub long: f64,
    pub address: String,
    pub date: DateTime<Utc>,
    pub payment_type: PaymentType,
    pub with_delivery: bool,
    pub comment_to_delivery: Option<String>,
    pub promo_code: Option<String>,
    pub total: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderProduct {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub level_id: Uuid,
    pub count: i32,
    pub measure: Measure,
    pub measure_count: i32,
    /// Unit price frozen at order time
    pub price: Decimal,
}

/// Tool rented together with a product line, billed at the companion rate
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderProductTool {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_product_id: Uuid,
    pub product_id: Uuid,
    pub tool_id: Uuid,
    pub count: i32,
    pub measure_count: i32,
    pub price: Decimal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderTool {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tool_id: Uuid,
    pub count: i32,
    pub price: Decimal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderMaster {
    pub order_id: Uuid,
    pub master_id: Uuid,
}

/// One rating event; a user may rate the same master many times
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MasterStar {
    pub id: Uuid,
    pub master_id: Uuid,
    pub user_id: Uuid,
    pub star: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Joined Read Model
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderProductToolDetails {
    #[serde(flatten)]
    pub line: OrderProductTool,
    pub tool: Tool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderProductDetails {
    #[serde(flatten)]
    pub line: OrderProduct,
    pub product: Product,
    pub level: Level,
    pub tools: Vec<OrderProductToolDetails>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderToolDetails {
    #[serde(flatten)]
    pub line: OrderTool,
    pub tool: Tool,
}

/// Order with every child row and the catalog records they reference
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub order_products: Vec<OrderProductDetails>,
    pub order_tools: Vec<OrderToolDetails>,
    pub masters: Vec<OrderMaster>,
    pub comments: Vec<Comment>,
}
