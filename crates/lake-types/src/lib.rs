pub mod error;
pub mod extracted_text;
pub mod filing;
pub mod queue;
pub mod records;
pub mod watermark;

pub use error::{Code, Error, ErrorCode, Result};
pub use extracted_text::{ExtractedTextMetadata, ExtractionMethod};
pub use filing::{DocumentRow, ExtractionStatus, FilingIndexEntry, FilingType};
pub use queue::QueueMessage;
pub use records::{ScheduleCode, StructuredRecord};
pub use watermark::{Watermark, WatermarkStatus};

/// A strong content digest, hex-encoded sha256. Used everywhere a byte sequence needs a
/// version identifier instead of a path.
pub type ContentHash = String;
