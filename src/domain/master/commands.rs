use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::Star;

// ============================================================================
// Master Commands
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateMaster {
    pub master_id: Uuid,
    pub star: Star,
}
