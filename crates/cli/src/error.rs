use lake_types::{Code, ErrorCode};

/// Errors raised while wiring up the process itself, before the pipeline's own
/// [`lake_types::Error`] has a chance to run (§4.13 "Error Taxonomy" covers ingestion and
/// extraction failures; this covers what happens before any of that starts).
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to open the Bronze object store at {path}: {source}")]
    BronzeStoreInit { path: String, #[source] source: anyhow::Error },
    #[error("failed to open the Silver object store at {path}: {source}")]
    SilverStoreInit { path: String, #[source] source: anyhow::Error },
    #[error("failed to open the state database at {path}: {source}")]
    StateStoreInit { path: String, #[source] source: anyhow::Error },
    #[error("failed to build the outbound HTTP client: {0}")]
    HttpClientInit(#[source] anyhow::Error),
    #[error("no year given for `{command}`; pass at least one --year")]
    NoYearsGiven { command: &'static str },
}

/// Maps a pipeline-level error to a process exit code: `1` for anything the queue or
/// orchestrator would itself treat as transient (worth a restart/retry at the process
/// level too), `2` for a permanent, data-level failure.
pub fn exit_code_for(err: &lake_types::Error) -> i32 {
    if err.is_transient() {
        1
    } else {
        2
    }
}

/// Same idea for the codes named directly, used by the `status` command when it reports
/// on dead-lettered and failed work without itself returning an `Err`.
pub fn is_transient(code: Code) -> bool {
    code.transient()
}
