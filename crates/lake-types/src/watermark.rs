use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ContentHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkStatus {
    Ok,
    Failed,
    Running,
}

impl std::fmt::Display for WatermarkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WatermarkStatus::Ok => "ok",
            WatermarkStatus::Failed => "failed",
            WatermarkStatus::Running => "running",
        };
        f.write_str(s)
    }
}

/// The value half of a `(source, key) -> Watermark` mapping (§4.3). The only mutable
/// record in the system besides Bronze user metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub content_hash: ContentHash,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_run_timestamp: OffsetDateTime,
    pub status: WatermarkStatus,
}
