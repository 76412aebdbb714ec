mod archive_ext;
mod download;
mod extract;
mod ingest;

pub use download::download_archive;
pub use extract::extract_archive;
pub use ingest::{ingest_archive, DocumentBlob, IngestOutcome};
