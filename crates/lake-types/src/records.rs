use serde::{Deserialize, Serialize};

/// Discriminator for a schedule within a filing (assets, liabilities, gifts, positions, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleCode {
    Assets,
    Transactions,
    Liabilities,
    Positions,
    Gifts,
    Travel,
    Agreements,
    CharitableContributions,
}

impl ScheduleCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleCode::Assets => "assets",
            ScheduleCode::Transactions => "transactions",
            ScheduleCode::Liabilities => "liabilities",
            ScheduleCode::Positions => "positions",
            ScheduleCode::Gifts => "gifts",
            ScheduleCode::Travel => "travel",
            ScheduleCode::Agreements => "agreements",
            ScheduleCode::CharitableContributions => "charitable_contributions",
        }
    }
}

/// A byte range into the Extracted Text this record was derived from, so a record can be
/// traced back to the text span that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: u32,
    pub end: u32,
}

/// One tagged variant per schedule (§9 "duck-typed records" redesign note). The
/// discriminator doubles as `ScheduleCode` via `Fields::code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schedule", rename_all = "snake_case")]
pub enum Fields {
    Assets { description: String, owner: String, value_range: String, income_type: Option<String> },
    Transactions { asset: String, transaction_type: String, date: String, amount_range: String },
    Liabilities { creditor: String, description: String, value_range: String },
    Positions { organization: String, position_title: String },
    Gifts { source: String, description: String, value_usd: Option<f64> },
    Travel { sponsor: String, destination: String, start_date: String, end_date: String },
    Agreements { party: String, description: String, date: String },
    CharitableContributions { recipient: String, description: String, value_usd: Option<f64> },
}

impl Fields {
    pub fn code(&self) -> ScheduleCode {
        match self {
            Fields::Assets { .. } => ScheduleCode::Assets,
            Fields::Transactions { .. } => ScheduleCode::Transactions,
            Fields::Liabilities { .. } => ScheduleCode::Liabilities,
            Fields::Positions { .. } => ScheduleCode::Positions,
            Fields::Gifts { .. } => ScheduleCode::Gifts,
            Fields::Travel { .. } => ScheduleCode::Travel,
            Fields::Agreements { .. } => ScheduleCode::Agreements,
            Fields::CharitableContributions { .. } => ScheduleCode::CharitableContributions,
        }
    }
}

/// `(doc_id, year, schedule_code)` keyed Structured Record (§3). Every record carries a
/// confidence in `[0, 1]` and a pointer to its source text span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredRecord {
    pub doc_id: String,
    pub year: u32,
    pub confidence: f32,
    pub source_span: TextSpan,
    #[serde(flatten)]
    pub fields: Fields,
}

impl StructuredRecord {
    pub fn schedule_code(&self) -> ScheduleCode {
        self.fields.code()
    }
}
