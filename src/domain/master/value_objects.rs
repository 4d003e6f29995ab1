use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::FulfillmentError;

/// A single rating, always within 1..=5
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Star(i32);

impl Star {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 5;

    pub fn value(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Star {
    type Error = FulfillmentError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(FulfillmentError::validation(format!(
                "star must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Star(value))
    }
}

impl From<Star> for i32 {
    fn from(star: Star) -> Self {
        star.0
    }
}

impl fmt::Display for Star {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
