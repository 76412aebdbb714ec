use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lake_types::{Error, Result};
use tempfile::NamedTempFile;

use crate::{content_hash, Metadata, ObjectMeta, ObjectStore};

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
struct Sidecar {
    metadata: Metadata,
}

/// Filesystem-backed object store. `Put` and `SetMetadata` are made atomic the same way
/// the rest of this codebase persists files: write to a `NamedTempFile` in the same
/// directory as the destination, then rename over it.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
    cas_lock: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, cas_lock: std::sync::Arc::new(tokio::sync::Mutex::new(())) })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        let mut p = self.object_path(key).into_os_string();
        p.push(".meta.json");
        PathBuf::from(p)
    }

    fn read_sidecar(&self, key: &str) -> Result<Sidecar> {
        match std::fs::read(self.sidecar_path(key)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_sidecar(&self, key: &str, sidecar: &Sidecar) -> Result<()> {
        let dst = self.sidecar_path(key);
        let dir = dst.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec(sidecar).map_err(anyhow::Error::from)?)?;
        tmp.flush()?;
        tmp.persist(dst).map_err(|e| Error::from(anyhow::Error::from(e)))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: bytes::Bytes, metadata: Metadata) -> Result<ObjectMeta> {
        let dst = self.object_path(key);
        let dir = dst.parent().unwrap_or(&self.root).to_path_buf();
        let key = key.to_string();
        let bytes2 = bytes.clone();
        let this = self.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes2)?;
            tmp.flush()?;
            tmp.persist(&dst).map_err(|e| Error::from(anyhow::Error::from(e)))?;
            this.write_sidecar(&key, &Sidecar { metadata })?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(e.into()))??;

        self.head(&key).await
    }

    async fn put_if_match(
        &self,
        key: &str,
        bytes: bytes::Bytes,
        metadata: Metadata,
        expected_etag: Option<&str>,
    ) -> Result<ObjectMeta> {
        let _guard = self.cas_lock.lock().await;
        let current_etag = match self.head(key).await {
            Ok(meta) => Some(meta.etag),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if current_etag.as_deref() != expected_etag {
            return Err(Error::ConcurrentUpdate(format!(
                "etag for `{key}` changed: expected {expected_etag:?}, found {current_etag:?}"
            )));
        }
        self.put(key, bytes, metadata).await
    }

    async fn get(&self, key: &str) -> Result<(bytes::Bytes, ObjectMeta)> {
        let path = self.object_path(key);
        let key = key.to_string();
        let this = self.clone();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            std::fs::read(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(path.display().to_string())
                } else {
                    e.into()
                }
            })
        })
        .await
        .map_err(|e| Error::Internal(e.into()))??;
        let meta = this.head(&key).await?;
        Ok((bytes::Bytes::from(bytes), meta))
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        let path = self.object_path(key);
        let len = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar = self.read_sidecar(key)?;
        // Cheap head: hash only the metadata + length, not the full body. The content
        // hash the caller cares about for versioning is normally carried explicitly in
        // `metadata["content-hash"]` by the writer (§4.6); the etag here just needs to
        // change whenever bytes or metadata change, which length+metadata bytes satisfy
        // in combination with the rename-on-write atomicity guarantee.
        let etag = content_hash(format!("{len}:{:?}", sidecar.metadata).as_bytes());
        Ok(ObjectMeta { etag, len, metadata: sidecar.metadata })
    }

    async fn set_metadata_cas(
        &self,
        key: &str,
        precondition_key: &str,
        expected: Option<&str>,
        metadata: Metadata,
    ) -> Result<ObjectMeta> {
        // Existence check first so SetMetadata on a missing object fails with NotFound
        // rather than silently creating a sidecar for nothing.
        std::fs::metadata(self.object_path(key))
            .map_err(|_| Error::NotFound(key.to_string()))?;
        let current = self.read_sidecar(key)?;
        let current_value = current.metadata.get(precondition_key).map(|s| s.as_str());
        if current_value != expected {
            return Err(Error::ConcurrentUpdate(format!(
                "precondition on `{precondition_key}` for `{key}` failed: expected {expected:?}, found {current_value:?}"
            )));
        }
        self.write_sidecar(key, &Sidecar { metadata })?;
        self.head(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut out = Vec::new();
            walk(&root, &root, &prefix, &mut out)?;
            out.sort();
            Ok(out)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }
}

fn walk(root: &Path, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, prefix, out)?;
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else { continue };
        let Some(rel) = rel.to_str() else { continue };
        if rel.ends_with(".meta.json") {
            continue;
        }
        if rel.starts_with(prefix) {
            out.push(rel.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes_and_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        store
            .put("bronze/house/year=2024/raw/archive.zip", bytes::Bytes::from_static(b"zipbytes"), meta(&[("content-hash", "abc")]))
            .await
            .unwrap();

        let (bytes, object_meta) = store.get("bronze/house/year=2024/raw/archive.zip").await.unwrap();
        assert_eq!(bytes.as_ref(), b"zipbytes");
        assert_eq!(object_meta.metadata.get("content-hash"), Some(&"abc".to_string()));
    }

    #[tokio::test]
    async fn head_does_not_require_the_body_to_be_readable() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        store.put("k", bytes::Bytes::from_static(b"x"), Metadata::new()).await.unwrap();
        let head = store.head("k").await.unwrap();
        assert_eq!(head.len, 1);
    }

    #[tokio::test]
    async fn head_on_missing_key_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        let err = store.head("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn set_metadata_cas_rejects_stale_precondition() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        store.put("k", bytes::Bytes::from_static(b"x"), meta(&[("extraction-processed", "false")])).await.unwrap();

        // Correct precondition succeeds and claims the document.
        store
            .set_metadata_cas("k", "extraction-processed", Some("false"), meta(&[("extraction-processed", "worker-1@t0")]))
            .await
            .unwrap();

        // A second worker racing on the old precondition is rejected.
        let err = store
            .set_metadata_cas("k", "extraction-processed", Some("false"), meta(&[("extraction-processed", "worker-2@t0")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrentUpdate(_)));
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_excludes_sidecars() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        store.put("a/1", bytes::Bytes::from_static(b"1"), Metadata::new()).await.unwrap();
        store.put("a/2", bytes::Bytes::from_static(b"2"), Metadata::new()).await.unwrap();
        store.put("b/1", bytes::Bytes::from_static(b"1"), Metadata::new()).await.unwrap();

        let listed = store.list("a/").await.unwrap();
        assert_eq!(listed, vec!["a/1".to_string(), "a/2".to_string()]);
    }

    #[tokio::test]
    async fn put_if_match_rejects_a_stale_etag() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        let created = store.put_if_match("part", bytes::Bytes::from_static(b"{}"), Metadata::new(), None).await.unwrap();

        let err = store
            .put_if_match("part", bytes::Bytes::from_static(b"{\"a\":1}"), Metadata::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrentUpdate(_)));

        let updated = store
            .put_if_match("part", bytes::Bytes::from_static(b"{\"a\":1}"), Metadata::new(), Some(&created.etag))
            .await
            .unwrap();
        assert_ne!(updated.etag, created.etag);
    }
}
