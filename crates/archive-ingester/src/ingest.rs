use std::sync::Arc;

use lake_types::{FilingType, Result};
use object_store_core::{content_hash, ObjectStore};

use crate::download::download_archive;
use crate::extract::extract_archive;

/// A document blob written to Bronze during extraction, identified by its file stem
/// (the House doc id) inside the archive.
#[derive(Debug, Clone)]
pub struct DocumentBlob {
    pub doc_id: String,
    pub content_hash: String,
}

/// Result of ingesting one year's archive: the raw archive's own content hash, the bytes
/// of `index.xml` for the Index Normalizer (§4.8) to parse next, and the set of document
/// blobs written to Bronze alongside it.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub archive_content_hash: String,
    pub index_xml: Vec<u8>,
    pub documents: Vec<DocumentBlob>,
}

/// Fetches the disclosure archive for `source`/`year`, writes the raw archive and every
/// contained document to Bronze, and returns `index.xml` for normalization (C7, §4.7).
///
/// This function owns download + unpack + Bronze write. It does not enqueue anything or
/// touch the Watermark Store — the caller (the Orchestrator, §4.10) decides whether an
/// ingested archive actually represents new content.
///
/// Per-filing PDFs land under `filing_type=<T>` partitions, so `index.xml` is parsed here
/// (not deferred to the Index Normalizer) purely to learn each document's filing type. A
/// PDF whose doc id has no matching index entry still gets written, parked under
/// `filing_type=O` rather than dropped — the Index Normalizer's own pass over the index is
/// what actually commits Silver rows and is free to treat it as failed/unindexed.
pub async fn ingest_archive(
    http: &http_client::reqwest::Client,
    store: Arc<dyn ObjectStore>,
    source: &str,
    year: u32,
    url: &str,
) -> Result<IngestOutcome> {
    let bytes = download_archive(http, url).await?;
    let archive_content_hash = content_hash(&bytes);

    let raw_key = format!("bronze/{source}/year={year}/raw/archive.zip");
    store
        .put(
            &raw_key,
            bytes.clone(),
            [("content-hash".to_string(), archive_content_hash.clone())].into_iter().collect(),
        )
        .await?;

    let dir = extract_archive(source, year, &bytes)?;
    let index_xml = find_index_xml(source, year, dir.path())?;

    let index_key = format!("bronze/{source}/year={year}/index/index.xml");
    store.put(&index_key, bytes::Bytes::from(index_xml.clone()), Default::default()).await?;

    let filing_types: std::collections::HashMap<String, FilingType> =
        match index_normalizer::normalize_index(source, year, &index_xml) {
            Ok(entries) => entries.into_iter().map(|e| (e.doc_id, e.filing_type)).collect(),
            Err(e) => {
                tracing::warn!(source, year, error = %e, "index.xml did not parse cleanly, documents will park under filing_type=O");
                std::collections::HashMap::new()
            }
        };

    let index_member_name = index_member_name(year);
    let mut documents = Vec::new();
    for entry in walk_files(dir.path())? {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else { continue };
        if name.eq_ignore_ascii_case(&index_member_name) {
            continue;
        }
        let doc_id = entry.file_stem().and_then(|s| s.to_str()).unwrap_or(name).to_string();
        let filing_type = filing_types.get(&doc_id).copied().unwrap_or(FilingType::O);
        let key = format!("bronze/{source}/year={year}/filing_type={filing_type}/pdfs/{doc_id}.pdf");

        let bytes = tokio::fs::read(&entry).await?;
        let hash = content_hash(&bytes);

        if let Ok(existing) = store.head(&key).await {
            if existing.metadata.get("content-hash").is_some_and(|h| h == &hash) {
                documents.push(DocumentBlob { doc_id, content_hash: hash });
                continue;
            }
        }

        let metadata = [
            ("content-hash".to_string(), hash.clone()),
            ("source-archive-hash".to_string(), archive_content_hash.clone()),
            ("extraction-processed".to_string(), "false".to_string()),
        ]
        .into_iter()
        .collect();
        store.put(&key, bytes::Bytes::from(bytes), metadata).await?;

        documents.push(DocumentBlob { doc_id, content_hash: hash });
    }

    Ok(IngestOutcome { archive_content_hash, index_xml, documents })
}

/// The House archive's in-zip index file is named `<YEAR>FD.xml` (e.g. `2024FD.xml`),
/// distinct from the normalized `index.xml` name this function's caller writes to Bronze.
fn index_member_name(year: u32) -> String {
    format!("{year}FD.xml")
}

fn find_index_xml(source: &str, year: u32, root: &std::path::Path) -> Result<Vec<u8>> {
    let expected_name = index_member_name(year);
    for entry in walk_files(root)? {
        if entry.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.eq_ignore_ascii_case(&expected_name)) {
            return Ok(std::fs::read(entry)?);
        }
    }
    Err(lake_types::Error::CorruptArchive {
        source: source.to_string(),
        year,
        reason: format!("archive did not contain {expected_name}"),
    })
}

fn walk_files(root: &std::path::Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    walk_files_into(root, &mut out)?;
    Ok(out)
}

fn walk_files_into(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_files_into(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}
