use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::FulfillmentError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Billing unit of a rented product line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Measure {
    Hour,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Cash,
    Card,
}

/// Order lifecycle status
///
/// `Pending` is set at creation, `InProgress` once masters are attached,
/// `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl Measure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Measure::Hour => "HOUR",
            Measure::Day => "DAY",
        }
    }
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Cash => "CASH",
            PaymentType::Card => "CARD",
        }
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl FromStr for Measure {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOUR" => Ok(Measure::Hour),
            "DAY" => Ok(Measure::Day),
            other => Err(FulfillmentError::ValidationFailed(format!(
                "unknown measure: {other}"
            ))),
        }
    }
}

impl FromStr for PaymentType {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH" => Ok(PaymentType::Cash),
            "CARD" => Ok(PaymentType::Card),
            other => Err(FulfillmentError::ValidationFailed(format!(
                "unknown payment type: {other}"
            ))),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "IN_PROGRESS" => Ok(OrderStatus::InProgress),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(FulfillmentError::ValidationFailed(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_matches_storage_form() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::InProgress,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert_eq!(OrderStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_status_json_uses_screaming_case() {
        let json = serde_json::to_string(&OrderStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");

        let measure: Measure = serde_json::from_str("\"DAY\"").unwrap();
        assert_eq!(measure, Measure::Day);
    }

    #[test]
    fn test_unknown_values_are_validation_errors() {
        assert!(matches!(
            "WEEK".parse::<Measure>(),
            Err(FulfillmentError::ValidationFailed(_))
        ));
        assert!(matches!(
            "CRYPTO".parse::<PaymentType>(),
            Err(FulfillmentError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::InProgress.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }
}
