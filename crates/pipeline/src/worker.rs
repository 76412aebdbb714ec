use std::time::Duration;

use futures::stream::{self, StreamExt};
use lake_types::{DocumentRow, Error, ErrorCode, ExtractionStatus, FilingType, Result};
use object_store_core::ObjectStore;
use time::OffsetDateTime;

use crate::context::PipelineContext;

/// A per-task deadline (§5 "Cancellation & timeouts"). On expiry the task aborts without
/// touching Bronze metadata beyond the claim it already holds, and the message is nacked
/// so the lease (queue or Bronze) simply expires and another worker retries.
const TASK_DEADLINE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerBatchOutcome {
    pub acked: usize,
    pub nacked: usize,
    pub dead_lettered: usize,
}

/// Drains up to `batch_size` messages from the queue for `source`, processing them
/// concurrently (C9, §5 "batch size B=10, so ≤10 tasks"), and resolves each against the
/// queue by ack, nack, or dead-letter once its disposition is known.
pub async fn run_batch(
    ctx: &PipelineContext,
    source: &str,
    worker_id: &str,
    batch_size: usize,
) -> Result<WorkerBatchOutcome> {
    let queue = ctx.state.queue();
    let mut leased = Vec::with_capacity(batch_size);
    for _ in 0..batch_size {
        match queue.receive(ctx.config.visibility_timeout).await? {
            Some(msg) => leased.push(msg),
            None => break,
        }
    }

    let dispositions: Vec<Disposition> = stream::iter(leased.iter())
        .map(|leased| process_one(ctx, source, worker_id, leased))
        .buffer_unordered(ctx.config.worker_concurrency)
        .collect()
        .await;

    let mut outcome = WorkerBatchOutcome::default();
    for (leased, disposition) in leased.iter().zip(dispositions) {
        match disposition {
            Disposition::Ack => {
                queue.ack(&leased.id).await?;
                outcome.acked += 1;
            }
            Disposition::Nack => {
                queue.nack(&leased.id).await?;
                outcome.nacked += 1;
            }
            Disposition::DeadLetter(reason) => {
                queue.move_to_dead_letter(&leased.id, &reason).await?;
                outcome.dead_lettered += 1;
            }
        }
    }

    Ok(outcome)
}

enum Disposition {
    Ack,
    Nack,
    DeadLetter(String),
}

async fn process_one(
    ctx: &PipelineContext,
    source: &str,
    worker_id: &str,
    leased: &state_store::LeasedMessage,
) -> Disposition {
    let doc_id = leased.message.doc_id.as_str();
    let year = leased.message.year;
    let filing_type = leased.message.filing_type;
    let bronze_key = bronze_pdf_key(source, year, filing_type, doc_id);

    match tokio::time::timeout(
        TASK_DEADLINE,
        extract_and_commit(ctx, source, worker_id, &bronze_key, doc_id, year, filing_type, leased.message.attempt_count),
    )
    .await
    {
        Ok(disposition) => disposition,
        Err(_) => {
            tracing::warn!(source, doc_id, year, "extraction task exceeded its deadline, nacking");
            if leased.message.attempt_count >= ctx.config.max_attempts {
                Disposition::DeadLetter(format!("exceeded deadline after {} attempts", leased.message.attempt_count))
            } else {
                Disposition::Nack
            }
        }
    }
}

async fn extract_and_commit(
    ctx: &PipelineContext,
    source: &str,
    worker_id: &str,
    bronze_key: &str,
    doc_id: &str,
    year: u32,
    filing_type: FilingType,
    attempt_count: u32,
) -> Disposition {
    let claim = match claim(ctx, bronze_key, worker_id).await {
        Ok(Claim::Acquired(value)) => value,
        Ok(Claim::AlreadyDone) => return Disposition::Ack,
        Ok(Claim::AlreadyFailedPermanent(reason)) => {
            tracing::debug!(source, doc_id, year, reason, "document already failed permanently, acking");
            return Disposition::Ack;
        }
        Ok(Claim::HeldByAnother) => return Disposition::Nack,
        Err(e) => return dispose_of_error(e, max_attempts_exceeded_reason(doc_id)),
    };

    match run_extraction(ctx, source, bronze_key, doc_id, year, filing_type).await {
        Ok(()) => match commit_transition(ctx, bronze_key, &claim, "true").await {
            Ok(()) => Disposition::Ack,
            Err(e) => dispose_of_error(e, max_attempts_exceeded_reason(doc_id)),
        },
        Err(e @ Error::ExtractionFailed { .. }) => {
            if attempt_count < ctx.config.max_attempts {
                tracing::warn!(source, doc_id, year, attempt_count, error = %e, "extraction failed, retrying");
                return Disposition::Nack;
            }
            let reason = e.to_string();
            if let Err(write_err) = write_failed_document_row(ctx, source, doc_id, year, filing_type, &reason).await {
                tracing::warn!(source, doc_id, year, error = %write_err, "failed to record permanent extraction failure in Silver");
            }
            match commit_transition(ctx, bronze_key, &claim, &format!("error:{reason}")).await {
                Ok(()) => Disposition::DeadLetter(reason),
                Err(commit_err) => dispose_of_error(commit_err, max_attempts_exceeded_reason(doc_id)),
            }
        }
        Err(e) => dispose_of_error(e, max_attempts_exceeded_reason(doc_id)),
    }
}

fn max_attempts_exceeded_reason(doc_id: &str) -> String {
    format!("{doc_id}: repeated conflicts claiming or committing Bronze metadata")
}

fn dispose_of_error(e: Error, permanent_reason: String) -> Disposition {
    match &e {
        Error::NotFound(_) => Disposition::DeadLetter(format!("bronze object missing: {e}")),
        _ if e.is_transient() => Disposition::Nack,
        Error::ConcurrentUpdate(_) => Disposition::Nack,
        _ => Disposition::DeadLetter(format!("{permanent_reason}: {e}")),
    }
}

async fn run_extraction(
    ctx: &PipelineContext,
    source: &str,
    bronze_key: &str,
    doc_id: &str,
    year: u32,
    filing_type: FilingType,
) -> Result<()> {
    let (pdf_bytes, _) = ctx.bronze.get(bronze_key).await?;
    let extracted = text_extractor::extract_text(doc_id, &pdf_bytes, ctx.config.ocr_fallback_threshold).await?;

    let structured = ctx.extractors().extract(doc_id, year, filing_type, &extracted.text)?;

    write_text(ctx, source, doc_id, year, &extracted).await?;
    write_structured(ctx, source, doc_id, year, filing_type, &structured).await?;

    let row = DocumentRow {
        doc_id: doc_id.to_string(),
        year,
        filing_type,
        content_hash: object_store_core::content_hash(&pdf_bytes),
        extraction_status: ExtractionStatus::Ok,
        failure_reason: None,
    };
    ctx.tabular_writer()
        .upsert(&documents_partition_key(source, year), std::slice::from_ref(&row), |r| {
            format!("{}:{}", r.doc_id, r.content_hash)
        })
        .await?;

    Ok(())
}

async fn write_text(
    ctx: &PipelineContext,
    source: &str,
    doc_id: &str,
    year: u32,
    extracted: &text_extractor::ExtractedText,
) -> Result<()> {
    use std::io::Write;
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(extracted.text.as_bytes()).map_err(|e| Error::Internal(e.into()))?;
    let compressed = gz.finish().map_err(|e| Error::Internal(e.into()))?;

    let key = format!("silver/{source}/text/year={year}/doc_id={doc_id}/text.gz");
    ctx.silver.put(&key, bytes::Bytes::from(compressed), Default::default()).await?;

    let metadata = lake_types::ExtractedTextMetadata {
        method: extracted.method,
        confidence: extracted.confidence,
        page_confidences: extracted.page_confidences.clone(),
        char_count: extracted.text.chars().count(),
        extracted_at: OffsetDateTime::now_utc(),
    };
    let metadata_key = format!("silver/{source}/text/year={year}/doc_id={doc_id}/metadata.json");
    let body = serde_json::to_vec(&metadata).map_err(|e| Error::Internal(e.into()))?;
    ctx.silver.put(&metadata_key, bytes::Bytes::from(body), Default::default()).await?;
    Ok(())
}

async fn write_structured(
    ctx: &PipelineContext,
    source: &str,
    doc_id: &str,
    year: u32,
    filing_type: FilingType,
    records: &[lake_types::records::StructuredRecord],
) -> Result<()> {
    let body = serde_json::to_vec(records).map_err(|e| Error::Internal(e.into()))?;
    let key = format!("silver/{source}/structured/filing_type={filing_type}/year={year}/doc_id={doc_id}.json");
    ctx.silver.put(&key, bytes::Bytes::from(body), Default::default()).await?;
    Ok(())
}

async fn write_failed_document_row(
    ctx: &PipelineContext,
    source: &str,
    doc_id: &str,
    year: u32,
    filing_type: FilingType,
    reason: &str,
) -> Result<()> {
    let (pdf_bytes, head) = match ctx.bronze.get(&bronze_pdf_key(source, year, filing_type, doc_id)).await {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };
    let content_hash = head.metadata.get("content-hash").cloned().unwrap_or_else(|| object_store_core::content_hash(&pdf_bytes));

    let row = DocumentRow {
        doc_id: doc_id.to_string(),
        year,
        filing_type,
        content_hash,
        extraction_status: ExtractionStatus::Failed,
        failure_reason: Some(reason.to_string()),
    };
    ctx.tabular_writer()
        .upsert(&documents_partition_key(source, year), std::slice::from_ref(&row), |r| {
            format!("{}:{}", r.doc_id, r.content_hash)
        })
        .await
}

fn documents_partition_key(source: &str, year: u32) -> String {
    format!("silver/{source}/documents/year={year}/part-0000.ndjson")
}

fn bronze_pdf_key(source: &str, year: u32, filing_type: FilingType, doc_id: &str) -> String {
    format!("bronze/{source}/year={year}/filing_type={filing_type}/pdfs/{doc_id}.pdf")
}

enum Claim {
    Acquired(String),
    AlreadyDone,
    AlreadyFailedPermanent(String),
    HeldByAnother,
}

/// Attempts the Bronze Metadata State Machine's `new → claimed` transition (§4.9): reads
/// the PDF's current `extraction-processed` value and, if it is absent/`"false"` or an
/// expired claim, CAS-writes a fresh `<worker-id>@<lease-until>` value. A claim currently
/// held by another worker (lease not yet expired) leaves the object untouched.
async fn claim(ctx: &PipelineContext, bronze_key: &str, worker_id: &str) -> Result<Claim> {
    let head = ctx.bronze.head(bronze_key).await?;
    let current = head.metadata.get("extraction-processed").map(|s| s.as_str());

    match current {
        Some("true") => return Ok(Claim::AlreadyDone),
        Some(v) if v.starts_with("error:") => return Ok(Claim::AlreadyFailedPermanent(v.to_string())),
        Some(v) if v.contains('@') => {
            let (owner, lease_str) = v.split_once('@').expect("checked contains '@'");
            let expired = parse_lease(lease_str).map_or(true, |lease_until| OffsetDateTime::now_utc() > lease_until);
            if owner != worker_id && !expired {
                return Ok(Claim::HeldByAnother);
            }
        }
        _ => {}
    }

    let lease_until = OffsetDateTime::now_utc() + ctx.config.visibility_timeout;
    let claim_value = format!("{worker_id}@{}", lease_until.format(&time::format_description::well_known::Rfc3339).unwrap());

    let mut metadata = head.metadata.clone();
    metadata.insert("extraction-processed".to_string(), claim_value.clone());

    match ctx.bronze.set_metadata_cas(bronze_key, "extraction-processed", current, metadata).await {
        Ok(_) => Ok(Claim::Acquired(claim_value)),
        Err(Error::ConcurrentUpdate(_)) => Ok(Claim::HeldByAnother),
        Err(e) => Err(e),
    }
}

/// The sole commit point after a successful extraction (`claimed → done`) or an
/// exhausted permanent failure (`claimed → failed-permanent`), both CAS-guarded on the
/// claim value this worker itself wrote (§4.9).
async fn commit_transition(ctx: &PipelineContext, bronze_key: &str, claim_value: &str, new_value: &str) -> Result<()> {
    let head = ctx.bronze.head(bronze_key).await?;
    let mut metadata = head.metadata.clone();
    metadata.insert("extraction-processed".to_string(), new_value.to_string());
    ctx.bronze
        .set_metadata_cas(bronze_key, "extraction-processed", Some(claim_value), metadata)
        .await?;
    Ok(())
}

fn parse_lease(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineConfig;
    use lake_types::QueueMessage;
    use object_store_core::Metadata;
    use std::sync::Arc;

    async fn test_context() -> (PipelineContext, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let bronze = Arc::new(object_store_core::LocalObjectStore::new(dir.path().join("bronze")).unwrap());
        let silver = Arc::new(object_store_core::LocalObjectStore::new(dir.path().join("silver")).unwrap());
        let state = state_store::StateStore::open_in_memory().unwrap();
        let http = http_client::reqwest::Client::builder()
            .build_with_policies(http_client::policy::IpPolicy::danger_always_allow(), Default::default())
            .unwrap();
        let ctx = PipelineContext::new(bronze, silver, state, http, PipelineConfig::default());
        (ctx, dir)
    }

    async fn seed_bronze_pdf(ctx: &PipelineContext, source: &str, year: u32, filing_type: FilingType, doc_id: &str, bytes: Vec<u8>) {
        let hash = object_store_core::content_hash(&bytes);
        let metadata: Metadata = [
            ("content-hash".to_string(), hash),
            ("source-archive-hash".to_string(), "irrelevant".to_string()),
            ("extraction-processed".to_string(), "false".to_string()),
        ]
        .into_iter()
        .collect();
        ctx.bronze.put(&bronze_pdf_key(source, year, filing_type, doc_id), bytes::Bytes::from(bytes), metadata).await.unwrap();
    }

    #[tokio::test]
    async fn a_claimed_document_cannot_be_claimed_again_by_another_worker() {
        let (ctx, _dir) = test_context().await;
        seed_bronze_pdf(&ctx, "house", 2024, FilingType::P, "doc-1", b"not a pdf".to_vec()).await;
        let key = bronze_pdf_key("house", 2024, FilingType::P, "doc-1");

        let first = claim(&ctx, &key, "worker-a").await.unwrap();
        assert!(matches!(first, Claim::Acquired(_)));

        let second = claim(&ctx, &key, "worker-b").await.unwrap();
        assert!(matches!(second, Claim::HeldByAnother));
    }

    #[tokio::test]
    async fn already_done_documents_are_acked_without_reprocessing() {
        let (ctx, _dir) = test_context().await;
        seed_bronze_pdf(&ctx, "house", 2024, FilingType::P, "doc-1", b"not a pdf".to_vec()).await;
        let key = bronze_pdf_key("house", 2024, FilingType::P, "doc-1");

        let claimed = claim(&ctx, &key, "worker-a").await.unwrap();
        let Claim::Acquired(claim_value) = claimed else { panic!("expected acquired") };
        commit_transition(&ctx, &key, &claim_value, "true").await.unwrap();

        let queue = ctx.state.queue();
        queue.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();
        let leased = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();

        let disposition = extract_and_commit(&ctx, "house", "worker-b", &key, "doc-1", 2024, FilingType::P, 1).await;
        assert!(matches!(disposition, Disposition::Ack));
        let _ = leased;
    }

    #[tokio::test]
    async fn missing_bronze_object_is_dead_lettered() {
        let (ctx, _dir) = test_context().await;
        let key = bronze_pdf_key("house", 2024, FilingType::P, "doc-missing");
        let err = claim(&ctx, &key, "worker-a").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn unparseable_pdf_is_nacked_for_retry_before_max_attempts() {
        let (ctx, _dir) = test_context().await;
        seed_bronze_pdf(&ctx, "house", 2024, FilingType::P, "doc-1", b"not a pdf".to_vec()).await;
        let queue = ctx.state.queue();
        queue.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();

        let outcome = run_batch(&ctx, "house", "worker-a", 10).await.unwrap();
        assert_eq!(outcome.nacked, 1, "first failure should be retried, not dead-lettered");
        assert_eq!(outcome.dead_lettered, 0);

        let head = ctx.bronze.head(&bronze_pdf_key("house", 2024, FilingType::P, "doc-1")).await.unwrap();
        let processed = head.metadata.get("extraction-processed").unwrap();
        assert!(processed.starts_with("worker-a@"), "claim should remain held pending retry, got {processed}");
    }

    #[tokio::test]
    async fn unparseable_pdf_is_dead_lettered_after_max_attempts_and_recorded_as_failed_in_silver() {
        let (ctx, _dir) = test_context().await;
        seed_bronze_pdf(&ctx, "house", 2024, FilingType::P, "doc-1", b"not a pdf".to_vec()).await;
        let queue = ctx.state.queue();
        queue.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();

        for attempt in 1..ctx.config.max_attempts {
            let outcome = run_batch(&ctx, "house", "worker-a", 10).await.unwrap();
            assert_eq!(outcome.nacked, 1, "attempt {attempt} should be retried, not dead-lettered");
            assert_eq!(outcome.dead_lettered, 0);
        }

        let outcome = run_batch(&ctx, "house", "worker-a", 10).await.unwrap();
        assert_eq!(outcome.dead_lettered, 1);
        assert_eq!(outcome.acked, 0);
        assert_eq!(queue.dead_letter_count().await.unwrap(), 1);

        let head = ctx.bronze.head(&bronze_pdf_key("house", 2024, FilingType::P, "doc-1")).await.unwrap();
        let processed = head.metadata.get("extraction-processed").unwrap();
        assert!(processed.starts_with("error:"), "expected failed-permanent marker, got {processed}");

        let (bytes, _) = ctx.silver.get("silver/house/documents/year=2024/part-0000.ndjson").await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("\"extractionStatus\":\"failed\""));
    }

    #[tokio::test]
    async fn held_by_another_worker_is_nacked_and_stays_visible() {
        let (ctx, _dir) = test_context().await;
        seed_bronze_pdf(&ctx, "house", 2024, FilingType::P, "doc-1", b"not a pdf".to_vec()).await;
        let key = bronze_pdf_key("house", 2024, FilingType::P, "doc-1");
        claim(&ctx, &key, "worker-a").await.unwrap();

        let queue = ctx.state.queue();
        queue.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();

        let outcome = run_batch(&ctx, "house", "worker-b", 10).await.unwrap();
        assert_eq!(outcome.nacked, 1);
    }
}
