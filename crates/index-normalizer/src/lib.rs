use std::collections::HashMap;

use lake_types::{DocumentRow, Error, ExtractionStatus, FilingIndexEntry, FilingType, QueueMessage, Result};
use quick_xml::de::from_str;
use serde::Deserialize;
use state_store::WorkQueue;
use tabular_writer::TabularWriter;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// One Bronze PDF discovered during ingest: `doc_id` plus the content hash it was stored
/// under. Mirrors `archive_ingester::DocumentBlob` without creating a dependency edge
/// the other way.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub doc_id: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOutcome {
    pub filings_written: usize,
    pub documents_written: usize,
    pub messages_enqueued: usize,
}

/// Normalizes `index.xml` plus the set of Bronze PDFs an ingest run produced into Silver
/// `filings` and `documents` rows, and enqueues extraction work for every new or amended
/// document row (§4.7). `documents` not referenced by any index entry are logged and
/// skipped rather than failing the whole run, matching the ingester's partial-failure
/// semantics (§4.6).
pub async fn normalize_and_persist(
    source: &str,
    year: u32,
    index_xml: &[u8],
    documents: &[RawDocument],
    tabular: &TabularWriter,
    queue: &WorkQueue,
) -> Result<NormalizeOutcome> {
    let entries = normalize_index(source, year, index_xml)?;

    tabular
        .upsert(&format!("silver/{source}/filings/year={year}/part-0000.ndjson"), &entries, |e| e.doc_id.clone())
        .await?;

    let filing_types: HashMap<&str, FilingType> =
        entries.iter().map(|e| (e.doc_id.as_str(), e.filing_type)).collect();

    let mut rows = Vec::with_capacity(documents.len());
    for doc in documents {
        let Some(filing_type) = filing_types.get(doc.doc_id.as_str()).copied() else {
            tracing::warn!(source, year, doc_id = %doc.doc_id, "document has no matching index entry, skipping");
            continue;
        };
        rows.push(DocumentRow {
            doc_id: doc.doc_id.clone(),
            year,
            filing_type,
            content_hash: doc.content_hash.clone(),
            extraction_status: ExtractionStatus::Pending,
            failure_reason: None,
        });
    }

    if !rows.is_empty() {
        tabular
            .upsert(&format!("silver/{source}/documents/year={year}/part-0000.ndjson"), &rows, |r| {
                format!("{}:{}", r.doc_id, r.content_hash)
            })
            .await?;
    }

    let mut messages_enqueued = 0;
    for row in &rows {
        queue.enqueue(QueueMessage::first_attempt(row.doc_id.clone(), row.year, row.filing_type)).await?;
        messages_enqueued += 1;
    }

    Ok(NormalizeOutcome { filings_written: entries.len(), documents_written: rows.len(), messages_enqueued })
}

/// Parses a House `index.xml` into normalized [`FilingIndexEntry`] rows (C8, §4.8).
///
/// `quick-xml` does not resolve external entities or process a DTD, so this parser is
/// not exposed to XXE regardless of what a hostile `index.xml` tries to declare; the
/// hardening here is choosing that parser, not anything this module does itself.
pub fn normalize_index(source: &str, year: u32, xml: &[u8]) -> Result<Vec<FilingIndexEntry>> {
    let xml = std::str::from_utf8(xml).map_err(|e| Error::CorruptArchive {
        source: source.to_string(),
        year,
        reason: format!("index.xml is not valid UTF-8: {e}"),
    })?;

    let doc: RawDisclosureIndex = from_str(xml).map_err(|e| Error::CorruptArchive {
        source: source.to_string(),
        year,
        reason: format!("index.xml did not parse: {e}"),
    })?;

    doc.member
        .into_iter()
        .map(|m| to_entry(source, year, m))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename = "FinancialDisclosure")]
struct RawDisclosureIndex {
    #[serde(rename = "Member", default)]
    member: Vec<RawMember>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    #[serde(rename = "FilerName", default)]
    filer_name: String,
    #[serde(rename = "FilingType")]
    filing_type: String,
    #[serde(rename = "StateDst", default)]
    state_dst: String,
    #[serde(rename = "FilingDate")]
    filing_date: String,
    #[serde(rename = "DocID")]
    doc_id: String,
}

fn to_entry(source: &str, year: u32, m: RawMember) -> Result<FilingIndexEntry> {
    let filing_type = FilingType::from_code(&m.filing_type).ok_or_else(|| Error::CorruptArchive {
        source: source.to_string(),
        year,
        reason: format!("unrecognized FilingType `{}` for doc {}", m.filing_type, m.doc_id),
    })?;

    let filing_date = parse_filing_date(&m.filing_date).ok_or_else(|| Error::CorruptArchive {
        source: source.to_string(),
        year,
        reason: format!("unparseable FilingDate `{}` for doc {}", m.filing_date, m.doc_id),
    })?;

    let filer_name = m.filer_name.trim().to_string();

    Ok(FilingIndexEntry {
        doc_id: m.doc_id,
        year,
        filing_type,
        filer_name,
        state_district: m.state_dst,
        filing_date,
        amends: None,
    })
}

fn parse_filing_date(raw: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[month padding:none]/[day padding:none]/[year]");
    let naive = PrimitiveDateTime::parse(raw.trim(), &format).ok()?;
    Some(naive.assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <FinancialDisclosure>
            <Member>
                <FilerName>Jordan Smith</FilerName>
                <FilingType>P</FilingType>
                <StateDst>CA01</StateDst>
                <FilingDate>1/15/2024</FilingDate>
                <DocID>20012345</DocID>
            </Member>
        </FinancialDisclosure>
    "#;

    #[test]
    fn parses_a_well_formed_index() {
        let entries = normalize_index("house", 2024, SAMPLE.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].doc_id, "20012345");
        assert_eq!(entries[0].filer_name, "Jordan Smith");
        assert_eq!(entries[0].filing_type, FilingType::P);
        let summary: Vec<String> = entries
            .iter()
            .map(|e| {
                format!(
                    "{} {} {} {} {} {}",
                    e.doc_id,
                    e.year,
                    e.filing_type,
                    e.filer_name,
                    e.state_district,
                    e.filing_date.date(),
                )
            })
            .collect();
        lake_snap::snapshot!(summary.join("\n"), @"20012345 2024 P Jordan Smith CA01 2024-01-15");
    }

    #[test]
    fn unknown_filing_type_is_rejected_as_corrupt() {
        let xml = SAMPLE.replace("<FilingType>P</FilingType>", "<FilingType>Z</FilingType>");
        let err = normalize_index("house", 2024, xml.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::CorruptArchive { .. }));
    }

    #[test]
    fn malformed_xml_is_rejected_as_corrupt() {
        let err = normalize_index("house", 2024, b"<FinancialDisclosure><Member>").unwrap_err();
        assert!(matches!(err, Error::CorruptArchive { .. }));
    }

    #[tokio::test]
    async fn persists_filings_and_documents_and_enqueues_known_docs() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = std::sync::Arc::new(object_store_core::LocalObjectStore::new(dir.path()).unwrap());
        let tabular = TabularWriter::new(store);
        let state = state_store::StateStore::open_in_memory().unwrap();
        let queue = state.queue();

        let documents = vec![
            RawDocument { doc_id: "20012345".to_string(), content_hash: "abc123".to_string() },
            RawDocument { doc_id: "99999999".to_string(), content_hash: "deadbeef".to_string() },
        ];

        let outcome =
            normalize_and_persist("house", 2024, SAMPLE.as_bytes(), &documents, &tabular, &queue).await.unwrap();

        assert_eq!(outcome.filings_written, 1);
        assert_eq!(outcome.documents_written, 1, "unindexed document must be skipped, not written");
        assert_eq!(outcome.messages_enqueued, 1);

        let leased = queue.receive(std::time::Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(leased.message.doc_id, "20012345");
    }
}
