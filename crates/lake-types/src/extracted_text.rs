use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How an Extracted Text row's text was obtained (§4.5): straight from the PDF's content
/// streams, entirely via OCR, or a per-page blend of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Embedded,
    Ocr,
    Mixed,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExtractionMethod::Embedded => "embedded",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

/// Sidecar persisted next to a Silver Extracted Text blob: `method`, the overall
/// char-count-weighted confidence, and the per-page scores it was averaged from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTextMetadata {
    pub method: ExtractionMethod,
    pub confidence: f32,
    pub page_confidences: Vec<f32>,
    pub char_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub extracted_at: OffsetDateTime,
}
