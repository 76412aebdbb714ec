pub mod error;
pub mod metrics;
pub mod option;
#[cfg(test)]
mod option_test;

use std::str::FromStr;
use std::sync::Arc;

use error::CliError;
use option::{LogMode, Opt};
use pipeline::orchestrator::ArchiveSource;
use pipeline::PipelineContext;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::Layer;

pub type LogStderrLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;
pub type LogStderrHandle = tracing_subscriber::reload::Handle<LogStderrLayer, tracing_subscriber::Registry>;

fn default_log_stderr_layer(opt: &Opt) -> LogStderrLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE);

    let layer: LogStderrLayer = match opt.log_mode {
        LogMode::Human => Box::new(layer),
        LogMode::Json => Box::new(layer.json()),
    };

    layer
        .with_filter(
            tracing_subscriber::filter::Targets::new()
                .with_target("", LevelFilter::from_str(&opt.log_level.to_string()).unwrap()),
        )
        .boxed()
}

/// Installs the global tracing subscriber behind a reload handle, the way this ecosystem's
/// processes are usually operated, even though nothing here currently triggers a reload.
pub fn setup_logging(opt: &Opt) -> anyhow::Result<LogStderrHandle> {
    let (layer, handle) = tracing_subscriber::reload::Layer::new(default_log_stderr_layer(opt));
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(handle)
}

pub fn on_panic(info: &std::panic::PanicHookInfo) {
    let info = info.to_string().replace('\n', " ");
    tracing::error!(%info, "panic");
}

/// Builds the shared [`PipelineContext`] (bronze/silver stores, state store, HTTP client)
/// from resolved options (§5: constructed once at startup, cheap to clone thereafter).
pub fn build_pipeline_context(opt: &Opt) -> anyhow::Result<PipelineContext> {
    let bronze = object_store_core::LocalObjectStore::new(&opt.bronze_path).map_err(|e| {
        CliError::BronzeStoreInit { path: opt.bronze_path.display().to_string(), source: e.into() }
    })?;
    let silver = object_store_core::LocalObjectStore::new(&opt.silver_path).map_err(|e| {
        CliError::SilverStoreInit { path: opt.silver_path.display().to_string(), source: e.into() }
    })?;
    let state = state_store::StateStore::open(&opt.queue_db_path).map_err(|e| CliError::StateStoreInit {
        path: opt.queue_db_path.display().to_string(),
        source: e.into(),
    })?;
    let http = http_client::reqwest::Client::builder()
        .build_with_policies(http_client::policy::IpPolicy::deny_all_local_ips(), Default::default())
        .map_err(|e| CliError::HttpClientInit(e.into()))?;

    Ok(PipelineContext::new(Arc::new(bronze), Arc::new(silver), state, http, opt.pipeline_config()))
}

/// The sole registered archive source today. `source_name`/`archive_base_url` are still
/// CLI-configurable because a second source would only need a second `ArchiveSource`, not
/// a code change anywhere else in the pipeline.
pub fn archive_source(opt: &Opt) -> ArchiveSource {
    // `ArchiveSource::url_for_year` is a plain `fn`, so it can't close over `opt`; it reads
    // the base URL back out of the environment variable `Opt::try_build` already resolved.
    ArchiveSource { name: Box::leak(opt.source_name.clone().into_boxed_str()), url_for_year }
}

fn url_for_year(year: u32) -> String {
    let base = std::env::var("LAKE_ARCHIVE_BASE_URL").unwrap_or_else(|_| option::DEFAULT_ARCHIVE_BASE_URL.to_string());
    format!("{}/{year}FD.zip", base.trim_end_matches('/'))
}

/// Runs the orchestrator loop for every configured year until `shutdown` fires (the `run`
/// subcommand).
pub async fn run(ctx: PipelineContext, opt: &Opt, years: Vec<u32>, shutdown: tokio::sync::watch::Receiver<bool>) {
    let source = archive_source(opt);
    let tick_interval = std::time::Duration::from_secs(opt.tick_interval_seconds);
    pipeline::orchestrator::run_loop(ctx, vec![source], years, tick_interval, shutdown).await;
}

/// Forces a single `(source, year)` through the pipeline once (the `ingest` subcommand).
pub async fn ingest(ctx: &PipelineContext, opt: &Opt, year: u32, force_refresh: bool) -> anyhow::Result<()> {
    let source = archive_source(opt);
    let mut ctx = ctx.clone();
    ctx.config.force_refresh = force_refresh;
    let outcome = pipeline::orchestrator::run_once(&ctx, &source, year).await?;
    tracing::info!(source = source.name, year, ?outcome, "ingest complete");
    Ok(())
}

/// Prints the current watermark for each requested year (the `status` subcommand).
pub async fn status(ctx: &PipelineContext, opt: &Opt, years: Vec<u32>) -> anyhow::Result<()> {
    let watermarks = ctx.state.watermarks();
    let queue = ctx.state.queue();
    for year in years {
        let watermark = watermarks.get(&opt.source_name, &year.to_string()).await?;
        let pending = queue.pending_count_for_year(year).await?;
        match watermark {
            Some(w) => println!(
                "{year}: status={:?} last_run={} pending={pending} content_hash={}",
                w.status, w.last_run_timestamp, w.content_hash
            ),
            None => println!("{year}: no watermark recorded yet, pending={pending}"),
        }
    }
    let dead_lettered = queue.dead_letter_count().await?;
    println!("dead-lettered messages: {dead_lettered}");
    Ok(())
}
