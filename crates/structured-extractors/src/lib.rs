use lake_types::records::{Fields, ScheduleCode, StructuredRecord, TextSpan};
use lake_types::{Error, FilingType, Result};
use regex::Regex;

mod schedules;

use schedules::SCHEDULES;

/// Filing types that are purely administrative (an extension request, a withdrawal, …)
/// and carry no schedule tables at all. Everything else is expected to parse into at
/// least one record.
fn carries_schedule_data(filing_type: FilingType) -> bool {
    !matches!(filing_type, FilingType::X | FilingType::D | FilingType::W)
}

/// Splits table-like PDF-extracted text into structured records (C6, §4.6).
///
/// Each schedule has a recognizable section header (`"Schedule A: Assets"`,
/// `"SCHEDULE A - ASSETS"`, case- and whitespace-insensitive) followed by rows in which
/// fields are separated by runs of two or more spaces — the layout `pdftotext`-family
/// tools produce from the House's underlying table form. A row that doesn't split into
/// the expected number of fields is skipped rather than guessed at; every record this
/// registry emits carries a confidence reflecting how literally the row matched.
pub struct ExtractorRegistry {
    schedules: Vec<ScheduleDefinition>,
}

struct ScheduleDefinition {
    header: Regex,
    build: fn(&[String]) -> Option<Fields>,
    field_count: usize,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self { schedules: SCHEDULES.iter().map(|s| s.build()).collect() }
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts every structured record findable in `text`, routed by `filing_type` (§4.5,
    /// §9). Administrative filing types that carry no schedule data always return an empty
    /// `Vec`. Every other filing type is expected to yield at least one record; if none of
    /// its schedule patterns match anywhere in `text`, that's a parse failure, not an empty
    /// result, and this returns `Err(ExtractionFailed)` rather than silently producing
    /// nothing. Records are returned in the order their source rows appear.
    pub fn extract(&self, doc_id: &str, year: u32, filing_type: FilingType, text: &str) -> Result<Vec<StructuredRecord>> {
        if !carries_schedule_data(filing_type) {
            return Ok(Vec::new());
        }

        // (body_start, next_header_start, schedule) — body runs from the end of this
        // header's match to the start of the next header's match, so a schedule's body
        // never swallows the line that introduces the next schedule.
        let mut header_hits: Vec<(usize, usize, &ScheduleDefinition)> = Vec::new();
        for schedule in &self.schedules {
            for m in schedule.header.find_iter(text) {
                header_hits.push((m.end(), m.start(), schedule));
            }
        }
        header_hits.sort_by_key(|(body_start, _, _)| *body_start);

        let mut records = Vec::new();
        for (i, (start, _, schedule)) in header_hits.iter().enumerate() {
            let body_end = header_hits.get(i + 1).map(|(_, next_start, _)| *next_start).unwrap_or(text.len());
            let body = &text[*start..body_end.min(text.len())];

            for line in body.lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let fields: Vec<String> =
                    FIELD_SPLIT.split(trimmed).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
                if fields.len() != schedule.field_count {
                    continue;
                }
                let Some(parsed) = (schedule.build)(&fields) else { continue };
                let line_start = *start + line_offset(body, line);
                records.push(StructuredRecord {
                    doc_id: doc_id.to_string(),
                    year,
                    confidence: 0.9,
                    source_span: TextSpan { start: line_start as u32, end: (line_start + line.len()) as u32 },
                    fields: parsed,
                });
            }
        }

        if records.is_empty() {
            return Err(Error::ExtractionFailed {
                doc_id: doc_id.to_string(),
                reason: format!("filing_type {filing_type} expects schedule data but none was recognized in the extracted text"),
            });
        }
        Ok(records)
    }
}

static FIELD_SPLIT: once_lazy_regex::LazyRegex = once_lazy_regex::lazy_regex(r"\s{2,}");

fn line_offset(haystack: &str, line: &str) -> usize {
    // SAFETY-free pointer arithmetic would be overkill; `line` always originates from
    // `haystack.lines()`, so a substring search from the correct starting byte is exact.
    haystack.find(line).unwrap_or(0)
}

mod once_lazy_regex {
    use regex::Regex;
    use std::sync::OnceLock;

    pub struct LazyRegex {
        pattern: &'static str,
        cell: OnceLock<Regex>,
    }

    impl std::ops::Deref for LazyRegex {
        type Target = Regex;
        fn deref(&self) -> &Regex {
            self.cell.get_or_init(|| Regex::new(self.pattern).unwrap())
        }
    }

    pub const fn lazy_regex(pattern: &'static str) -> LazyRegex {
        LazyRegex { pattern, cell: OnceLock::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_an_assets_row_under_its_header() {
        let text = "SCHEDULE A: ASSETS\nApple Inc  Self  $1,001 - $15,000  Dividend\n\nSCHEDULE B: TRANSACTIONS\n";
        let records = ExtractorRegistry::new().extract("doc-1", 2024, FilingType::A, text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].schedule_code(), ScheduleCode::Assets);
        match &records[0].fields {
            Fields::Assets { description, owner, .. } => {
                assert_eq!(description, "Apple Inc");
                assert_eq!(owner, "Self");
            }
            other => panic!("unexpected fields: {other:?}"),
        }
    }

    #[test]
    fn rows_that_do_not_match_the_schedules_field_count_are_skipped_but_still_fail_with_nothing_parsed() {
        let text = "SCHEDULE A: ASSETS\nmalformed single column row\n";
        let err = ExtractorRegistry::new().extract("doc-1", 2024, FilingType::A, text).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }

    #[test]
    fn text_with_no_recognized_headers_fails_explicitly_for_a_schedule_bearing_filing_type() {
        let err = ExtractorRegistry::new().extract("doc-1", 2024, FilingType::A, "just some prose, no schedules here").unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }

    #[test]
    fn administrative_filing_types_yield_no_records_without_erroring() {
        let records = ExtractorRegistry::new().extract("doc-1", 2024, FilingType::X, "just some prose, no schedules here").unwrap();
        assert!(records.is_empty());
    }
}
