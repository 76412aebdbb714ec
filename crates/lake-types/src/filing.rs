use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ContentHash;

/// Short code denoting a filing's shape (Annual, Periodic Transaction Report,
/// Termination, Extension, …). Matches the codes used in the House index XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilingType {
    /// Periodic Transaction Report
    P,
    /// Annual
    A,
    /// Termination
    T,
    /// Extension
    X,
    /// Due Date Extension
    D,
    /// Withdrawal
    W,
    /// Gift
    G,
    /// Candidate
    C,
    /// Blind Trust
    B,
    /// Exemption
    E,
    /// House Candidate
    H,
    /// Other
    O,
}

impl FilingType {
    pub fn code(&self) -> char {
        match self {
            FilingType::P => 'P',
            FilingType::A => 'A',
            FilingType::T => 'T',
            FilingType::X => 'X',
            FilingType::D => 'D',
            FilingType::W => 'W',
            FilingType::G => 'G',
            FilingType::C => 'C',
            FilingType::B => 'B',
            FilingType::E => 'E',
            FilingType::H => 'H',
            FilingType::O => 'O',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "P" => Some(FilingType::P),
            "A" => Some(FilingType::A),
            "T" => Some(FilingType::T),
            "X" => Some(FilingType::X),
            "D" => Some(FilingType::D),
            "W" => Some(FilingType::W),
            "G" => Some(FilingType::G),
            "C" => Some(FilingType::C),
            "B" => Some(FilingType::B),
            "E" => Some(FilingType::E),
            "H" => Some(FilingType::H),
            "O" => Some(FilingType::O),
            _ => None,
        }
    }
}

impl std::fmt::Display for FilingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code().to_string())
    }
}

/// One row of the archive index: a single disclosure entry. Immutable once parsed from
/// `index.xml` (§4.7 Index Normalizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilingIndexEntry {
    pub doc_id: String,
    pub year: u32,
    pub filing_type: FilingType,
    pub filer_name: String,
    pub state_district: String,
    #[serde(with = "time::serde::rfc3339")]
    pub filing_date: OffsetDateTime,
    /// `doc_id` of the filing this one amends, if any.
    pub amends: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filing_type_round_trips_through_code() {
        for ft in [
            FilingType::P,
            FilingType::A,
            FilingType::T,
            FilingType::X,
            FilingType::D,
            FilingType::W,
            FilingType::G,
            FilingType::C,
            FilingType::B,
            FilingType::E,
            FilingType::H,
            FilingType::O,
        ] {
            let code = ft.code().to_string();
            assert_eq!(FilingType::from_code(&code), Some(ft));
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(FilingType::from_code("Z"), None);
    }
}

/// Extraction status carried on the Silver `documents` row (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Ok,
    Failed,
    Pending,
}

/// Silver `documents` row. Primary key is `(doc_id, content_hash)` so multiple rewrites of
/// the same `doc_id` remain independently addressable (§4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRow {
    pub doc_id: String,
    pub year: u32,
    pub filing_type: FilingType,
    pub content_hash: ContentHash,
    pub extraction_status: ExtractionStatus,
    pub failure_reason: Option<String>,
}
