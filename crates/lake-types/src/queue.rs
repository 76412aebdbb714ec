use serde::{Deserialize, Serialize};

use crate::filing::FilingType;

/// The Queue Message envelope (§6): ephemeral, deleted on success, moved to dead-letter
/// after a bounded retry count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub doc_id: String,
    pub year: u32,
    pub filing_type: FilingType,
    pub attempt_count: u32,
}

impl QueueMessage {
    pub fn first_attempt(doc_id: impl Into<String>, year: u32, filing_type: FilingType) -> Self {
        Self { doc_id: doc_id.into(), year, filing_type, attempt_count: 0 }
    }
}
