use std::sync::Arc;

use object_store_core::ObjectStore;
use state_store::StateStore;
use structured_extractors::ExtractorRegistry;
use tabular_writer::TabularWriter;

/// Runtime-tunable knobs from the configuration surface (§6) that the pipeline itself
/// reads. Object-store backend selection and logging live in the CLI layer; this struct
/// only carries what `pipeline`'s own control flow branches on.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_concurrency: usize,
    pub visibility_timeout: std::time::Duration,
    pub max_attempts: u32,
    pub drain_deadline: std::time::Duration,
    pub quality_fail_fraction: f64,
    pub force_refresh: bool,
    pub ocr_fallback_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 10,
            visibility_timeout: std::time::Duration::from_secs(900),
            max_attempts: 5,
            drain_deadline: std::time::Duration::from_secs(14_400),
            quality_fail_fraction: 0.01,
            force_refresh: false,
            ocr_fallback_threshold: 0.15,
        }
    }
}

/// Handles to the four external stores plus resolved configuration, constructed once at
/// startup and shared by every worker and orchestrator run (§5: "the only legitimate
/// in-process shared state"). Cheap to clone: every field is an `Arc` or a plain value.
#[derive(Clone)]
pub struct PipelineContext {
    pub bronze: Arc<dyn ObjectStore>,
    pub silver: Arc<dyn ObjectStore>,
    pub state: StateStore,
    pub http: http_client::reqwest::Client,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(
        bronze: Arc<dyn ObjectStore>,
        silver: Arc<dyn ObjectStore>,
        state: StateStore,
        http: http_client::reqwest::Client,
        config: PipelineConfig,
    ) -> Self {
        Self { bronze, silver, state, http, config }
    }

    pub fn tabular_writer(&self) -> TabularWriter {
        TabularWriter::new(self.silver.clone())
    }

    pub fn extractors(&self) -> ExtractorRegistry {
        ExtractorRegistry::new()
    }
}
