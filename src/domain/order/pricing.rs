use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::value_objects::Measure;
use crate::domain::errors::FulfillmentError;

// ============================================================================
// Order Pricing - pure, no I/O
// ============================================================================
//
// subtotal  = Σ product lines + Σ companion tools + Σ standalone tools
// delivery  = 10 when delivery requested
// discount  = 10% with promo code, plus 5% when subtotal > 100 (additive)
// tax       = 10% of subtotal
// total     = subtotal + delivery + tax - discount, rounded to cents
//
// All arithmetic is checked; an order too large to price or to store is
// rejected as invalid input.
//
// ============================================================================

/// Hourly and daily rates of a catalog record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub hourly: Decimal,
    pub daily: Decimal,
}

impl Rates {
    pub fn new(hourly: Decimal, daily: Decimal) -> Self {
        Self { hourly, daily }
    }

    pub fn for_measure(&self, measure: Measure) -> Decimal {
        match measure {
            Measure::Hour => self.hourly,
            Measure::Day => self.daily,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductLine {
    pub product: Rates,
    pub level: Rates,
    pub measure: Measure,
    pub measure_count: i32,
    pub count: i32,
}

/// Tool rented alongside a product line; inherits the line's duration
#[derive(Debug, Clone, PartialEq)]
pub struct CompanionToolLine {
    pub price: Decimal,
    pub measure_count: i32,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandaloneToolLine {
    pub price: Decimal,
    pub count: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingInput {
    pub products: Vec<ProductLine>,
    pub companion_tools: Vec<CompanionToolLine>,
    pub standalone_tools: Vec<StandaloneToolLine>,
    pub with_delivery: bool,
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

const DELIVERY_FEE: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
const BIG_ORDER_THRESHOLD: Decimal = Decimal::from_parts(100, 0, 0, false, 0);
const TAX_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);
const PROMO_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);
const BIG_ORDER_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
const COMPANION_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Largest total the order row can hold: 999 999 999 999.99
pub const MAX_TOTAL: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

fn too_large(what: &str) -> FulfillmentError {
    FulfillmentError::validation(format!("order is too large to price: {what} overflows"))
}

fn mul(a: Decimal, b: Decimal, what: &str) -> Result<Decimal, FulfillmentError> {
    a.checked_mul(b).ok_or_else(|| too_large(what))
}

fn add(a: Decimal, b: Decimal, what: &str) -> Result<Decimal, FulfillmentError> {
    a.checked_add(b).ok_or_else(|| too_large(what))
}

/// Frozen per-unit price of a product line: (product rate + level rate) × duration
pub fn unit_price(line: &ProductLine) -> Result<Decimal, FulfillmentError> {
    let duration = Decimal::from(line.measure_count);
    let product_price = mul(line.product.for_measure(line.measure), duration, "product price")?;
    let level_price = mul(line.level.for_measure(line.measure), duration, "level price")?;
    add(product_price, level_price, "unit price")
}

/// Per-unit price of a tool used with a product: half rate over the line's duration
pub fn companion_tool_price(price: Decimal, measure_count: i32) -> Result<Decimal, FulfillmentError> {
    let full = mul(price, Decimal::from(measure_count), "companion tool price")?;
    mul(full, COMPANION_RATE, "companion tool price")
}

pub fn has_promo_code(promo_code: Option<&str>) -> bool {
    promo_code.is_some_and(|code| !code.trim().is_empty())
}

pub fn price_order(input: &PricingInput) -> Result<PriceBreakdown, FulfillmentError> {
    let mut subtotal = Decimal::ZERO;

    for line in &input.products {
        let amount = mul(unit_price(line)?, Decimal::from(line.count), "product line")?;
        subtotal = add(subtotal, amount, "subtotal")?;
    }
    for tool in &input.companion_tools {
        let unit = companion_tool_price(tool.price, tool.measure_count)?;
        let amount = mul(unit, Decimal::from(tool.count), "companion tool line")?;
        subtotal = add(subtotal, amount, "subtotal")?;
    }
    for tool in &input.standalone_tools {
        let amount = mul(tool.price, Decimal::from(tool.count), "tool line")?;
        subtotal = add(subtotal, amount, "subtotal")?;
    }

    let delivery_fee = if input.with_delivery {
        DELIVERY_FEE
    } else {
        Decimal::ZERO
    };

    let mut discount = Decimal::ZERO;
    if has_promo_code(input.promo_code.as_deref()) {
        discount = add(discount, mul(subtotal, PROMO_RATE, "discount")?, "discount")?;
    }
    if subtotal > BIG_ORDER_THRESHOLD {
        discount = add(discount, mul(subtotal, BIG_ORDER_RATE, "discount")?, "discount")?;
    }

    let tax = mul(subtotal, TAX_RATE, "tax")?;

    let gross = add(add(subtotal, delivery_fee, "total")?, tax, "total")?;
    let total = gross
        .checked_sub(discount)
        .ok_or_else(|| too_large("total"))?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    if total > MAX_TOTAL {
        return Err(FulfillmentError::validation(format!(
            "order total {total} exceeds the maximum of {MAX_TOTAL}"
        )));
    }

    Ok(PriceBreakdown {
        subtotal,
        delivery_fee,
        tax,
        discount,
        total,
    })
}

// ============================================================================
// Unit Tests
// ============================================================================
