use std::time::Duration;

use async_trait::async_trait;
use lake_types::{Error, Result};
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use time::OffsetDateTime;

use crate::{Metadata, ObjectMeta, ObjectStore};

const SIGN_DURATION: Duration = Duration::from_secs(60);
const METADATA_PREFIX: &str = "x-amz-meta-";

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

/// S3-compatible object store backend. Metadata rides as `x-amz-meta-*` object headers;
/// `SetMetadata` has no native atomic primitive on S3, so it is simulated with a
/// server-side copy-onto-self (`x-amz-metadata-directive: REPLACE`) guarded by an
/// `If-Match` precondition on the object's current etag, which S3 evaluates atomically.
#[derive(Clone)]
pub struct S3ObjectStore {
    bucket: Bucket,
    credentials: Credentials,
    http: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(config: S3Config) -> Result<Self> {
        let url_style = if config.path_style { UrlStyle::Path } else { UrlStyle::VirtualHost };
        let endpoint = config.endpoint.parse().map_err(|e: url::ParseError| Error::Internal(e.into()))?;
        let bucket = Bucket::new(endpoint, url_style, config.bucket, config.region)
            .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;
        let credentials = Credentials::new(config.access_key, config.secret_key);
        Ok(Self { bucket, credentials, http: reqwest::Client::new() })
    }

    async fn retrying<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let backoff = backoff::ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::from_secs(30)))
            .build();
        backoff::future::retry(backoff, || async {
            op().await.map_err(|e| match &e {
                Error::TransientIo(_) | Error::DeadlineExceeded(_) => backoff::Error::transient(e),
                _ => backoff::Error::permanent(e),
            })
        })
        .await
        .map_err(|e| match e {
            backoff::Error::Permanent(e) => e,
            backoff::Error::Transient { err, .. } => err,
        })
    }

    fn meta_headers(metadata: &Metadata) -> Vec<(String, String)> {
        metadata
            .iter()
            .map(|(k, v)| (format!("{METADATA_PREFIX}{k}"), v.clone()))
            .collect()
    }

    fn parse_meta_headers(headers: &reqwest::header::HeaderMap) -> Metadata {
        headers
            .iter()
            .filter_map(|(name, value)| {
                let name = name.as_str();
                let key = name.strip_prefix(METADATA_PREFIX)?;
                let value = value.to_str().ok()?;
                Some((key.to_string(), value.to_string()))
            })
            .collect()
    }

    fn etag_header(headers: &reqwest::header::HeaderMap) -> String {
        headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim_matches('"')
            .to_string()
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: bytes::Bytes, metadata: Metadata) -> Result<ObjectMeta> {
        self.retrying(|| async {
            let action = self.bucket.put_object(Some(&self.credentials), key);
            let url = action.sign(SIGN_DURATION);
            let mut req = self.http.put(url).body(bytes.clone());
            for (k, v) in Self::meta_headers(&metadata) {
                req = req.header(k, v);
            }
            let resp = req.send().await.map_err(|e| Error::TransientIo(e.into()))?;
            if !resp.status().is_success() {
                return Err(Error::PermanentIo(anyhow::anyhow!("PUT {key} failed: {}", resp.status())));
            }
            let etag = Self::etag_header(resp.headers());
            Ok(ObjectMeta { etag, len: bytes.len() as u64, metadata: metadata.clone() })
        })
        .await
    }

    /// S3 `PutObject` has no `If-Match` precondition, so the compare step happens
    /// client-side via a fresh `Head` immediately before the write. This narrows but does
    /// not eliminate the race window; the Tabular Writer (§4.4) treats a partition whose
    /// write lost the race the same as one rejected outright, and retries from a fresh
    /// read.
    async fn put_if_match(
        &self,
        key: &str,
        bytes: bytes::Bytes,
        metadata: Metadata,
        expected_etag: Option<&str>,
    ) -> Result<ObjectMeta> {
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
        self.retrying(|| async {
            let action = self.bucket.get_object(Some(&self.credentials), key);
            let url = action.sign(SIGN_DURATION);
            let resp = self.http.get(url).send().await.map_err(|e| Error::TransientIo(e.into()))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::NotFound(key.to_string()));
            }
            if !resp.status().is_success() {
                return Err(Error::PermanentIo(anyhow::anyhow!("GET {key} failed: {}", resp.status())));
            }
            let etag = Self::etag_header(resp.headers());
            let metadata = Self::parse_meta_headers(resp.headers());
            let bytes = resp.bytes().await.map_err(|e| Error::TransientIo(e.into()))?;
            let meta = ObjectMeta { etag, len: bytes.len() as u64, metadata };
            Ok((bytes, meta))
        })
        .await
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        self.retrying(|| async {
            let action = self.bucket.head_object(Some(&self.credentials), key);
            let url = action.sign(SIGN_DURATION);
            let resp = self.http.head(url).send().await.map_err(|e| Error::TransientIo(e.into()))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::NotFound(key.to_string()));
            }
            if !resp.status().is_success() {
                return Err(Error::PermanentIo(anyhow::anyhow!("HEAD {key} failed: {}", resp.status())));
            }
            let etag = Self::etag_header(resp.headers());
            let len = resp
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let metadata = Self::parse_meta_headers(resp.headers());
            Ok(ObjectMeta { etag, len, metadata })
        })
        .await
    }

    async fn set_metadata_cas(
        &self,
        key: &str,
        precondition_key: &str,
        expected: Option<&str>,
        metadata: Metadata,
    ) -> Result<ObjectMeta> {
        let current = self.head(key).await?;
        let current_value = current.metadata.get(precondition_key).map(|s| s.as_str());
        if current_value != expected {
            return Err(Error::ConcurrentUpdate(format!(
                "precondition on `{precondition_key}` for `{key}` failed: expected {expected:?}, found {current_value:?}"
            )));
        }

        self.retrying(|| async {
            let action = self.bucket.copy_object(Some(&self.credentials), key, key);
            let url = action.sign(SIGN_DURATION);
            let mut req = self
                .http
                .put(url)
                .header("x-amz-metadata-directive", "REPLACE")
                .header("if-match", current.etag.clone());
            for (k, v) in Self::meta_headers(&metadata) {
                req = req.header(k, v);
            }
            let resp = req.send().await.map_err(|e| Error::TransientIo(e.into()))?;
            if resp.status() == reqwest::StatusCode::PRECONDITION_FAILED {
                return Err(Error::ConcurrentUpdate(format!(
                    "etag for `{key}` changed concurrently during SetMetadata"
                )));
            }
            if !resp.status().is_success() {
                return Err(Error::PermanentIo(anyhow::anyhow!(
                    "metadata copy-onto-self for {key} failed: {}",
                    resp.status()
                )));
            }
            Ok(())
        })
        .await?;

        self.head(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.retrying(|| async {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action.with_prefix(prefix);
            let url = action.sign(SIGN_DURATION);
            let resp = self.http.get(url).send().await.map_err(|e| Error::TransientIo(e.into()))?;
            if !resp.status().is_success() {
                return Err(Error::PermanentIo(anyhow::anyhow!("LIST {prefix} failed: {}", resp.status())));
            }
            let body = resp.text().await.map_err(|e| Error::TransientIo(e.into()))?;
            parse_list_keys(&body)
        })
        .await
    }
}

fn parse_list_keys(xml: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Key>") {
        let after = &rest[start + "<Key>".len()..];
        let Some(end) = after.find("</Key>") else { break };
        keys.push(after[..end].to_string());
        rest = &after[end..];
    }
    Ok(keys)
}

/// Used only to decide whether the retry loop should keep going; the actual timestamp
/// never leaves this module.
#[allow(dead_code)]
fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_out_of_list_objects_v2_xml() {
        let xml = r#"<ListBucketResult><Contents><Key>a/1</Key></Contents><Contents><Key>a/2</Key></Contents></ListBucketResult>"#;
        assert_eq!(parse_list_keys(xml).unwrap(), vec!["a/1".to_string(), "a/2".to_string()]);
    }
}
