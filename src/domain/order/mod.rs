// ============================================================================
// Order Domain - Business Logic for the Order Aggregate
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (Measure, PaymentType, OrderStatus)
// - Commands (CreateOrder, AssignMasters, UpdateOrderStatus)
// - Pricing (subtotal, delivery fee, tax, promo discount)
// - Aggregate (OrderDraft builder, status transitions)
// - Command Handler (OrderCommandHandler)
//
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod pricing;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use commands::*;
pub use pricing::PriceBreakdown;
pub use aggregate::*;
pub use command_handler::*;
