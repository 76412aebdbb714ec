pub mod context;
pub mod orchestrator;
pub mod update_detector;
pub mod worker;

pub use context::{PipelineConfig, PipelineContext};
