use lake_types::records::Fields;
use regex::Regex;

use crate::ScheduleDefinition;

pub(crate) struct ScheduleSpec {
    header_pattern: &'static str,
    build: fn(&[String]) -> Option<Fields>,
    field_count: usize,
}

impl ScheduleSpec {
    pub(crate) fn build(&self) -> ScheduleDefinition {
        ScheduleDefinition {
            header: Regex::new(self.header_pattern).expect("schedule header pattern is valid"),
            build: self.build,
            field_count: self.field_count,
        }
    }
}

fn money_or_none(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse().ok()
    }
}

fn some_or_none(s: &str) -> Option<String> {
    if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(s.to_string())
    }
}

pub(crate) static SCHEDULES: &[ScheduleSpec] = &[
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*a\s*[:\-]?\s*assets",
        field_count: 4,
        build: |f| {
            Some(Fields::Assets {
                description: f[0].clone(),
                owner: f[1].clone(),
                value_range: f[2].clone(),
                income_type: some_or_none(&f[3]),
            })
        },
    },
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*b\s*[:\-]?\s*transactions",
        field_count: 4,
        build: |f| {
            Some(Fields::Transactions {
                asset: f[0].clone(),
                transaction_type: f[1].clone(),
                date: f[2].clone(),
                amount_range: f[3].clone(),
            })
        },
    },
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*c\s*[:\-]?\s*liabilities",
        field_count: 3,
        build: |f| {
            Some(Fields::Liabilities { creditor: f[0].clone(), description: f[1].clone(), value_range: f[2].clone() })
        },
    },
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*d\s*[:\-]?\s*positions",
        field_count: 2,
        build: |f| Some(Fields::Positions { organization: f[0].clone(), position_title: f[1].clone() }),
    },
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*e\s*[:\-]?\s*gifts",
        field_count: 3,
        build: |f| {
            Some(Fields::Gifts { source: f[0].clone(), description: f[1].clone(), value_usd: money_or_none(&f[2]) })
        },
    },
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*f\s*[:\-]?\s*travel",
        field_count: 4,
        build: |f| {
            Some(Fields::Travel {
                sponsor: f[0].clone(),
                destination: f[1].clone(),
                start_date: f[2].clone(),
                end_date: f[3].clone(),
            })
        },
    },
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*g\s*[:\-]?\s*agreements",
        field_count: 3,
        build: |f| Some(Fields::Agreements { party: f[0].clone(), description: f[1].clone(), date: f[2].clone() }),
    },
    ScheduleSpec {
        header_pattern: r"(?i)schedule\s*h\s*[:\-]?\s*charitable\s*contributions",
        field_count: 3,
        build: |f| {
            Some(Fields::CharitableContributions {
                recipient: f[0].clone(),
                description: f[1].clone(),
                value_usd: money_or_none(&f[2]),
            })
        },
    },
];
