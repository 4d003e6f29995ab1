// ============================================================================
// Master Domain - Ratings for service providers
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod command_handler;

pub use value_objects::*;
pub use commands::*;
pub use command_handler::*;
