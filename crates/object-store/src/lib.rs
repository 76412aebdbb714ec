mod local;
mod s3;

use std::collections::BTreeMap;

use async_trait::async_trait;
use lake_types::Result;

pub use local::LocalObjectStore;
pub use s3::{S3Config, S3ObjectStore};

/// Short lowercase keys to short strings (§4.1). Kept as a `BTreeMap` so a sidecar
/// serialization of the map is deterministic across writes of the same metadata.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Opaque version token; changes whenever the object's bytes change. Used by the
    /// Tabular Writer's optimistic concurrency check (§4.4) and by `SetMetadata`'s
    /// compare-and-set precondition (§4.9).
    pub etag: String,
    pub len: u64,
    pub metadata: Metadata,
}

/// Content-addressed blob store with user-defined metadata (C1, §4.1).
///
/// `Put` is atomic per key: readers see the old or new object, never a partial write.
/// `SetMetadata` is atomic even when the backend has no native in-place metadata
/// mutation; implementers simulate it with an atomic rewrite that preserves the byte
/// content exactly.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: bytes::Bytes, metadata: Metadata) -> Result<ObjectMeta>;

    /// Atomic conditional write: succeeds only if the object's current etag equals
    /// `expected_etag` (`None` meaning "the key must not exist yet"). Used by the
    /// Tabular Writer's partitioned upsert (§4.4) so two writers racing on the same
    /// partition never silently clobber one another.
    async fn put_if_match(
        &self,
        key: &str,
        bytes: bytes::Bytes,
        metadata: Metadata,
        expected_etag: Option<&str>,
    ) -> Result<ObjectMeta>;

    async fn get(&self, key: &str) -> Result<(bytes::Bytes, ObjectMeta)>;

    /// Cheap: must not transfer the object body.
    async fn head(&self, key: &str) -> Result<ObjectMeta>;

    /// Atomic conditional metadata update. `expected` is compared against the object's
    /// current metadata value for `precondition_key`; on mismatch, returns
    /// `Error::ConcurrentUpdate` without writing (the §4.9 claim precondition).
    async fn set_metadata_cas(
        &self,
        key: &str,
        precondition_key: &str,
        expected: Option<&str>,
        metadata: Metadata,
    ) -> Result<ObjectMeta>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

pub fn content_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash(b"hello world");
        let b = content_hash(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, content_hash(b"hello worlD"));
    }
}
