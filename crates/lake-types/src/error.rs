use std::{fmt, io};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Implement all the error codes used across the pipeline.
///
/// 1. Make an enum `Code` where each error code is a variant.
/// 2. Implement `transient`, classifying whether the queue/orchestrator should retry or
///    dead-letter an error carrying this code.
macro_rules! make_error_codes {
    ($($code_ident:ident, $transient:ident);* $(;)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Code {
            $($code_ident),*
        }

        impl Code {
            /// Whether the queue/orchestrator should retry (nack/requeue) or treat this
            /// error as permanent (dead-letter/fail the run).
            pub fn transient(&self) -> bool {
                match self {
                    $(Code::$code_ident => $transient),*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Code::$code_ident => stringify!($code_ident)),*
                }
            }
        }
    }
}

make_error_codes! {
    NotFound,               false;
    TransientIoError,       true;
    PermanentIoError,       false;
    ConcurrentUpdate,       true;
    SchemaDrift,            false;
    CorruptArchive,         false;
    ExtractionFailed,       false;
    DeadlineExceeded,       true;
    ConcurrentIngestion,    false;
    QualityGateFailed,      false;
    Internal,               false;
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait ErrorCode {
    fn error_code(&self) -> Code;

    fn is_transient(&self) -> bool {
        self.error_code().transient()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("transient I/O error: {0}")]
    TransientIo(#[source] anyhow::Error),
    #[error("permanent I/O error: {0}")]
    PermanentIo(#[source] anyhow::Error),
    #[error("partition was concurrently modified, etag mismatch: {0}")]
    ConcurrentUpdate(String),
    #[error("schema drift on partition {partition}: {reason}")]
    SchemaDrift { partition: String, reason: String },
    #[error("corrupt archive for {source}/{year}: {reason}")]
    CorruptArchive { source: String, year: u32, reason: String },
    #[error("extraction failed for {doc_id}: {reason}")]
    ExtractionFailed { doc_id: String, reason: String },
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),
    #[error("watermark update for {source}/{key} conflicted after {attempts} attempts")]
    ConcurrentIngestion { source: String, key: String, attempts: u32 },
    #[error("quality gate failed for {source}/{year}: {reason}")]
    QualityGateFailed { source: String, year: u32, reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ErrorCode for Error {
    fn error_code(&self) -> Code {
        match self {
            Error::NotFound(_) => Code::NotFound,
            Error::TransientIo(_) => Code::TransientIoError,
            Error::PermanentIo(_) => Code::PermanentIoError,
            Error::ConcurrentUpdate(_) => Code::ConcurrentUpdate,
            Error::SchemaDrift { .. } => Code::SchemaDrift,
            Error::CorruptArchive { .. } => Code::CorruptArchive,
            Error::ExtractionFailed { .. } => Code::ExtractionFailed,
            Error::DeadlineExceeded(_) => Code::DeadlineExceeded,
            Error::ConcurrentIngestion { .. } => Code::ConcurrentIngestion,
            Error::QualityGateFailed { .. } => Code::QualityGateFailed,
            Error::Internal(_) => Code::Internal,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock => Error::TransientIo(e.into()),
            _ => Error::PermanentIo(e.into()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Internal(e.into())
    }
}

#[macro_export]
macro_rules! internal_error {
    ($target:ty : $($other:path), *) => {
        $(
            impl From<$other> for $target {
                fn from(other: $other) -> Self {
                    Self::Internal(other.into())
                }
            }
        )*
    }
}
