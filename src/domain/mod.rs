// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with:
// - Value objects
// - Commands
// - Aggregate rules
// - Command handler
//
// Handlers only talk to storage through `store::StoreTransaction`.
//
// ============================================================================

pub mod errors;
pub mod master;
pub mod order;

pub use errors::FulfillmentError;
