use std::time::Duration;

use lake_types::{DocumentRow, Error, ExtractionStatus, Result, Watermark, WatermarkStatus};
use object_store_core::ObjectStore;
use state_store::WatermarkStore;
use time::OffsetDateTime;

use crate::context::PipelineContext;
use crate::update_detector::check_for_update;
use crate::worker;

/// A registered remote source: its name (used as the Bronze/Silver/watermark partition
/// key) and the function turning a year into a fetchable archive URL.
#[derive(Clone, Copy)]
pub struct ArchiveSource {
    pub name: &'static str,
    pub url_for_year: fn(u32) -> String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Unchanged,
    Published,
    AbandonedConcurrentUpdate,
    FailedIngest,
    FailedNormalize,
    FailedDrainTimeout,
    FailedQuality,
}

/// Runs the `CheckUpdate → Ingest → Normalize → Drain → QualityGate → Publish →
/// UpdateWatermark` state machine once for `(source, year)` (C10, §4.10). Each state
/// transition is logged as a structured `tick` event; a failure branch marks the
/// watermark `failed` while retaining its previously-recorded content hash, per §7's
/// "prior watermark retained" rule.
pub async fn run_once(ctx: &PipelineContext, source: &ArchiveSource, year: u32) -> Result<RunOutcome> {
    let key = year.to_string();
    let watermarks = ctx.state.watermarks();
    let prior = watermarks.get(source.name, &key).await?;

    tracing::info!(source = source.name, year, state = "CheckUpdate", "tick");
    let url = (source.url_for_year)(year);

    let check = check_for_update(&ctx.http, &watermarks, source.name, year, &url).await?;
    if !ctx.config.force_refresh && !check.changed {
        tracing::info!(source = source.name, year, state = "Done", outcome = "unchanged", "tick");
        return Ok(RunOutcome::Unchanged);
    }

    tracing::info!(source = source.name, year, state = "Ingest", "tick");
    let ingest = match archive_ingester::ingest_archive(&ctx.http, ctx.bronze.clone(), source.name, year, &url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            mark_failed(&watermarks, source.name, &key, &prior, &e).await;
            return Ok(RunOutcome::FailedIngest);
        }
    };

    tracing::info!(source = source.name, year, state = "Normalize", "tick");
    let documents: Vec<index_normalizer::RawDocument> = ingest
        .documents
        .iter()
        .map(|d| index_normalizer::RawDocument { doc_id: d.doc_id.clone(), content_hash: d.content_hash.clone() })
        .collect();
    let normalized = match index_normalizer::normalize_and_persist(
        source.name,
        year,
        &ingest.index_xml,
        &documents,
        &ctx.tabular_writer(),
        &ctx.state.queue(),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            mark_failed(&watermarks, source.name, &key, &prior, &e).await;
            return Ok(RunOutcome::FailedNormalize);
        }
    };

    tracing::info!(source = source.name, year, state = "Drain", enqueued = normalized.messages_enqueued, "tick");
    if !drain(ctx, source.name, year).await? {
        mark_failed(&watermarks, source.name, &key, &prior, &Error::DeadlineExceeded(ctx.config.drain_deadline)).await;
        return Ok(RunOutcome::FailedDrainTimeout);
    }

    tracing::info!(source = source.name, year, state = "QualityGate", "tick");
    if let Err(e) = quality_gate(ctx, source.name, year).await {
        mark_failed(&watermarks, source.name, &key, &prior, &e).await;
        return Ok(RunOutcome::FailedQuality);
    }

    tracing::info!(source = source.name, year, state = "Publish", "tick");
    // No-op today; reserved for a future atomic-swap hook.

    tracing::info!(source = source.name, year, state = "UpdateWatermark", "tick");
    let new_watermark = Watermark {
        content_hash: check.content_hash,
        last_modified: check.last_modified,
        last_run_timestamp: OffsetDateTime::now_utc(),
        status: WatermarkStatus::Ok,
    };
    match watermarks.compare_and_set(source.name, &key, prior.as_ref().map(|w| w.content_hash.as_str()), new_watermark).await {
        Ok(()) => Ok(RunOutcome::Published),
        Err(Error::ConcurrentIngestion { .. }) => {
            tracing::warn!(source = source.name, year, "watermark changed underneath this run, abandoning publish");
            Ok(RunOutcome::AbandonedConcurrentUpdate)
        }
        Err(e) => Err(e),
    }
}

async fn mark_failed(watermarks: &WatermarkStore, source: &str, key: &str, prior: &Option<Watermark>, err: &Error) {
    tracing::error!(source, key, error = %err, "run failed, marking watermark failed");
    let watermark = Watermark {
        content_hash: prior.as_ref().map(|w| w.content_hash.clone()).unwrap_or_default(),
        last_modified: prior.as_ref().and_then(|w| w.last_modified),
        last_run_timestamp: OffsetDateTime::now_utc(),
        status: WatermarkStatus::Failed,
    };
    if let Err(e) = watermarks.put(source, key, watermark).await {
        tracing::error!(source, key, error = %e, "failed to persist the failed watermark itself");
    }
}

/// Runs [`worker::run_batch`] against `source` until every message enqueued for `year`
/// has been acked, nacked past its retry budget, or dead-lettered, backing off from 2s to
/// a 30s cap whenever a batch comes back empty, bounded by a 4h hard deadline. Returns
/// `false` on deadline exceeded. This is the only place `run_batch` is ever called from a
/// live run; it's what actually drains the work `index_normalizer::normalize_and_persist`
/// just enqueued.
async fn drain(ctx: &PipelineContext, source: &str, year: u32) -> Result<bool> {
    let queue = ctx.state.queue();
    let deadline = OffsetDateTime::now_utc() + ctx.config.drain_deadline;
    let mut backoff = Duration::from_secs(2);

    loop {
        if queue.pending_count_for_year(year).await? == 0 {
            return Ok(true);
        }
        if OffsetDateTime::now_utc() >= deadline {
            return Ok(false);
        }

        let outcome = worker::run_batch(ctx, source, "orchestrator-drain", ctx.config.worker_concurrency).await?;
        if outcome.acked == 0 && outcome.nacked == 0 && outcome.dead_lettered == 0 {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(30));
        } else {
            backoff = Duration::from_secs(2);
        }
    }
}

/// Checks invariants 1 and 3 from §3 by comparing Bronze's PDF listing against the Silver
/// `documents` partition: every Silver document row needs a matching Bronze PDF, and every
/// row marked `extraction_status=ok` needs a corresponding Extracted Text blob. Fails when
/// the violation rate exceeds `quality_fail_fraction`.
async fn quality_gate(ctx: &PipelineContext, source: &str, year: u32) -> Result<()> {
    let bronze_prefix = format!("bronze/{source}/year={year}/");
    let bronze_doc_ids: std::collections::HashSet<String> = ctx
        .bronze
        .list(&bronze_prefix)
        .await?
        .into_iter()
        .filter(|k| k.contains("/pdfs/") && k.ends_with(".pdf"))
        .filter_map(|k| k.rsplit('/').next().map(|f| f.trim_end_matches(".pdf").to_string()))
        .collect();

    let documents = read_documents(ctx, &format!("silver/{source}/documents/year={year}/part-0000.ndjson")).await?;

    let mut violations = 0usize;
    for doc in &documents {
        if !bronze_doc_ids.contains(&doc.doc_id) {
            violations += 1;
            continue;
        }
        if doc.extraction_status == ExtractionStatus::Ok {
            let text_key = format!("silver/{source}/text/year={year}/doc_id={}/text.gz", doc.doc_id);
            if ctx.silver.head(&text_key).await.is_err() {
                violations += 1;
            }
        }
    }

    let total = documents.len().max(1);
    let fraction = violations as f64 / total as f64;
    if fraction > ctx.config.quality_fail_fraction {
        return Err(Error::QualityGateFailed {
            source: source.to_string(),
            year,
            reason: format!(
                "{violations}/{total} documents violate invariants ({fraction:.4} over threshold {:.4})",
                ctx.config.quality_fail_fraction
            ),
        });
    }
    Ok(())
}

async fn read_documents(ctx: &PipelineContext, key: &str) -> Result<Vec<DocumentRow>> {
    match ctx.silver.get(key).await {
        Ok((bytes, _)) => {
            let text = std::str::from_utf8(&bytes).map_err(|e| Error::Internal(e.into()))?;
            text.lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| serde_json::from_str(l).map_err(|e| Error::Internal(e.into())))
                .collect()
        }
        Err(Error::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Drives [`run_once`] for every `(source, year)` pair in a loop, the way a long-running
/// scheduler drives its own tick loop: each tick runs inside its own task so a panic while
/// handling one `(source, year)` cannot take the process down, mirroring what a dedicated
/// control thread would get from wrapping a synchronous tick in `catch_unwind`.
pub async fn run_loop(
    ctx: PipelineContext,
    sources: Vec<ArchiveSource>,
    years: Vec<u32>,
    tick_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        for source in &sources {
            for &year in &years {
                let ctx = ctx.clone();
                let source = *source;
                let outcome = tokio::spawn(async move { run_once(&ctx, &source, year).await }).await;
                match outcome {
                    Ok(Ok(outcome)) => tracing::info!(source = source.name, year, ?outcome, "tick complete"),
                    Ok(Err(e)) => tracing::error!(source = source.name, year, error = %e, "tick returned an error"),
                    Err(join_err) => tracing::error!(source = source.name, year, error = %join_err, "tick panicked"),
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineConfig;
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

    #[tokio::test]
    async fn quality_gate_passes_on_an_empty_year() {
        let (ctx, _dir) = test_context().await;
        quality_gate(&ctx, "house", 2024).await.unwrap();
    }

    #[tokio::test]
    async fn quality_gate_fails_when_every_document_is_orphaned() {
        let (ctx, _dir) = test_context().await;
        let row = DocumentRow {
            doc_id: "doc-1".to_string(),
            year: 2024,
            filing_type: lake_types::FilingType::P,
            content_hash: "abc".to_string(),
            extraction_status: ExtractionStatus::Pending,
            failure_reason: None,
        };
        ctx.tabular_writer()
            .upsert("silver/house/documents/year=2024/part-0000.ndjson", &[row], |r| r.doc_id.clone())
            .await
            .unwrap();

        let err = quality_gate(&ctx, "house", 2024).await.unwrap_err();
        assert!(matches!(err, Error::QualityGateFailed { .. }));
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_the_queue_is_already_empty() {
        let (ctx, _dir) = test_context().await;
        assert!(drain(&ctx, "house", 2024).await.unwrap());
    }
}
