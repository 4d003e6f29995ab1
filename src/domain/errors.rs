use std::time::Duration;
use uuid::Uuid;

use crate::domain::order::OrderStatus;
use crate::utils::IsTransient;

// ============================================================================
// Fulfillment Errors
// ============================================================================
//
// One taxonomy for every core operation. Client-correctable variants carry
// enough detail to explain the rejection; `Internal` keeps the storage detail
// out of its message and only logs it.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Insufficient stock for {entity} {id}: requested {requested}, available {available}")]
    InsufficientStock {
        entity: &'static str,
        id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Some {entity} ids were not found: {missing:?}")]
    PartialNotFound {
        entity: &'static str,
        missing: Vec<Uuid>,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal storage failure")]
    Internal(String),
}

impl FulfillmentError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        FulfillmentError::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FulfillmentError::ValidationFailed(message.into())
    }

    /// Errors the caller can fix by changing the request (400-class)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FulfillmentError::NotFound { .. }
                | FulfillmentError::InsufficientStock { .. }
                | FulfillmentError::PartialNotFound { .. }
                | FulfillmentError::ValidationFailed(_)
                | FulfillmentError::InvalidStatusTransition { .. }
        )
    }

    /// Stable label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::NotFound { .. } => "not_found",
            FulfillmentError::InsufficientStock { .. } => "insufficient_stock",
            FulfillmentError::PartialNotFound { .. } => "partial_not_found",
            FulfillmentError::ValidationFailed(_) => "validation_failed",
            FulfillmentError::InvalidStatusTransition { .. } => "invalid_status_transition",
            FulfillmentError::Conflict(_) => "conflict",
            FulfillmentError::Timeout(_) => "timeout",
            FulfillmentError::Internal(_) => "internal",
        }
    }
}

impl IsTransient for FulfillmentError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            FulfillmentError::Conflict(_) | FulfillmentError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &error {
            // serialization_failure, deadlock_detected
            if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
                tracing::warn!(error = %error, "Transaction aborted by concurrent writer");
                return FulfillmentError::Conflict(db_err.message().to_string());
            }
        }

        tracing::error!(error = %error, "Storage failure");
        FulfillmentError::Internal(error.to_string())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        let id = Uuid::new_v4();
        assert!(FulfillmentError::not_found("Product", id).is_client_error());
        assert!(FulfillmentError::InsufficientStock {
            entity: "Tool",
            id,
            requested: 5,
            available: 3,
        }
        .is_client_error());
        assert!(FulfillmentError::validation("bad").is_client_error());
        assert!(!FulfillmentError::Conflict("raced".into()).is_client_error());
        assert!(!FulfillmentError::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn test_only_conflict_and_timeout_are_transient() {
        assert!(FulfillmentError::Conflict("raced".into()).is_transient());
        assert!(FulfillmentError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!FulfillmentError::validation("bad").is_transient());
        assert!(!FulfillmentError::Internal("boom".into()).is_transient());
    }

    #[test]
    fn test_internal_message_hides_detail() {
        let error = FulfillmentError::Internal("relation \"orders\" does not exist".into());
        assert_eq!(error.to_string(), "Internal storage failure");
        assert_eq!(error.kind(), "internal");
    }

    #[test]
    fn test_insufficient_stock_message() {
        let id = Uuid::nil();
        let error = FulfillmentError::InsufficientStock {
            entity: "Tool",
            id,
            requested: 5,
            available: 3,
        };
        assert_eq!(
            error.to_string(),
            format!("Insufficient stock for Tool {id}: requested 5, available 3")
        );
    }
}
