use std::time::Duration;

use lake_types::{Error, Result, WatermarkStatus};
use object_store_core::content_hash;
use state_store::WatermarkStore;
use time::OffsetDateTime;

/// Outcome of probing a remote source against the recorded watermark (C11, §4.11).
#[derive(Debug, Clone)]
pub struct UpdateCheck {
    pub changed: bool,
    /// The validator this run observed. Becomes the watermark's new `content_hash` once
    /// the Orchestrator commits a successful ingest.
    pub content_hash: String,
    pub last_modified: Option<OffsetDateTime>,
}

/// Checks whether the remote archive for `source`/`year` has changed since the last
/// recorded watermark, preferring a cheap header probe over a full download: an `ETag` if
/// the server sends one, else `Last-Modified` + `Content-Length` as a weaker signal, else a
/// ranged GET of the first few kilobytes hashed as a last resort.
pub async fn check_for_update(
    http: &http_client::reqwest::Client,
    watermarks: &WatermarkStore,
    source: &str,
    year: u32,
    url: &str,
) -> Result<UpdateCheck> {
    let probe = probe_remote(http, url).await?;
    let key = year.to_string();
    let existing = watermarks.get(source, &key).await?;

    let changed = match &existing {
        Some(w) => w.content_hash != probe.content_hash || w.status != WatermarkStatus::Ok,
        None => true,
    };

    Ok(UpdateCheck { changed, content_hash: probe.content_hash, last_modified: probe.last_modified })
}

struct RemoteProbe {
    content_hash: String,
    last_modified: Option<OffsetDateTime>,
}

async fn probe_remote(http: &http_client::reqwest::Client, url: &str) -> Result<RemoteProbe> {
    let backoff = backoff::ExponentialBackoffBuilder::new().with_max_elapsed_time(Some(Duration::from_secs(30))).build();

    backoff::future::retry(backoff, || async {
        let resp = http
            .head(url)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(Error::TransientIo(anyhow::anyhow!(e.to_string()))))?;

        if resp.status().is_server_error() {
            return Err(backoff::Error::transient(Error::TransientIo(anyhow::anyhow!(
                "HEAD {url} returned {}",
                resp.status()
            ))));
        }
        if !resp.status().is_success() {
            return Err(backoff::Error::permanent(Error::PermanentIo(anyhow::anyhow!(
                "HEAD {url} returned {}",
                resp.status()
            ))));
        }

        let last_modified = resp
            .headers()
            .get(http_client::reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let etag = resp
            .headers()
            .get(http_client::reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        let content_length = resp.content_length();

        let hint = if let Some(etag) = etag {
            etag
        } else if last_modified.is_some() || content_length.is_some() {
            format!("weak:{}:{}", last_modified.map(|t| t.unix_timestamp()).unwrap_or(0), content_length.unwrap_or(0))
        } else {
            let ranged = http
                .get(url)
                .prepare(|b| b.header(http_client::reqwest::header::RANGE, "bytes=0-4095"))
                .send()
                .await
                .map_err(|e| backoff::Error::transient(Error::TransientIo(anyhow::anyhow!(e.to_string()))))?;
            let bytes = ranged
                .bytes()
                .await
                .map_err(|e| backoff::Error::transient(Error::TransientIo(anyhow::anyhow!(e.to_string()))))?;
            format!("ranged:{}", content_hash(&bytes))
        };

        Ok(RemoteProbe { content_hash: hint, last_modified })
    })
    .await
    .map_err(|e| match e {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    })
}

fn parse_http_date(raw: &str) -> Option<OffsetDateTime> {
    let format = time::macros::format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    OffsetDateTime::parse(raw.trim(), &format).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_http_date() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parsed.year(), 1994);
    }

    #[test]
    fn garbage_date_parses_to_none() {
        assert!(parse_http_date("not a date").is_none());
    }
}
