use std::time::Duration;

use lake_types::{Error, Result};

/// Downloads the yearly disclosure archive, retrying transient network failures with
/// exponential backoff. A non-2xx response is treated as permanent: retrying a 404 or a
/// 403 burns the retry budget for nothing.
pub async fn download_archive(client: &http_client::reqwest::Client, url: &str) -> Result<bytes::Bytes> {
    let backoff = backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::from_secs(120)))
        .build();

    backoff::future::retry(backoff, || async {
        let resp = client.get(url).send().await.map_err(|e| {
            backoff::Error::transient(Error::TransientIo(anyhow::anyhow!(e.to_string())))
        })?;

        if resp.status().is_server_error() {
            return Err(backoff::Error::transient(Error::TransientIo(anyhow::anyhow!(
                "GET {url} returned {}",
                resp.status()
            ))));
        }
        if !resp.status().is_success() {
            return Err(backoff::Error::permanent(Error::PermanentIo(anyhow::anyhow!(
                "GET {url} returned {}",
                resp.status()
            ))));
        }

        resp.bytes()
            .await
            .map_err(|e| backoff::Error::transient(Error::TransientIo(anyhow::anyhow!(e.to_string()))))
    })
    .await
    .map_err(|e| match e {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    })
}
