use std::sync::{Arc, Mutex};

use lake_types::{Error, Result, Watermark, WatermarkStatus};
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS watermarks (
    source              TEXT NOT NULL,
    key                 TEXT NOT NULL,
    content_hash        TEXT NOT NULL,
    last_modified       TEXT,
    last_run_timestamp  TEXT NOT NULL,
    status              TEXT NOT NULL,
    PRIMARY KEY (source, key)
);
";

/// Strongly-consistent `(source, key) -> Watermark` store (§4.3). Every read and write
/// goes through the same SQLite connection as the Work Queue, so a caller can observe a
/// watermark update and a queue drain as a single consistent snapshot.
#[derive(Clone)]
pub struct WatermarkStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl WatermarkStore {
    pub async fn get(&self, source: &str, key: &str) -> Result<Option<Watermark>> {
        let this = self.clone();
        let source = source.to_string();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.get_blocking(&source, &key))
            .await
            .map_err(|e| Error::Internal(e.into()))?
    }

    fn get_blocking(&self, source: &str, key: &str) -> Result<Option<Watermark>> {
        let conn = self.conn.lock().unwrap();
        row_to_watermark(
            conn.query_row(
                "SELECT content_hash, last_modified, last_run_timestamp, status
                 FROM watermarks WHERE source = ?1 AND key = ?2",
                params![source, key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?,
        )
    }

    /// Unconditional upsert, used when there is no concurrent writer to race against
    /// (for example, marking a run `Running` right after this process claimed it).
    pub async fn put(&self, source: &str, key: &str, watermark: Watermark) -> Result<()> {
        let this = self.clone();
        let source = source.to_string();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.put_blocking(&source, &key, &watermark))
            .await
            .map_err(|e| Error::Internal(e.into()))?
    }

    fn put_blocking(&self, source: &str, key: &str, watermark: &Watermark) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO watermarks (source, key, content_hash, last_modified, last_run_timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (source, key) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_modified = excluded.last_modified,
                last_run_timestamp = excluded.last_run_timestamp,
                status = excluded.status",
            params![
                source,
                key,
                watermark.content_hash,
                watermark.last_modified.map(format_rfc3339),
                format_rfc3339(watermark.last_run_timestamp),
                status_str(watermark.status),
            ],
        )?;
        Ok(())
    }

    /// Atomic compare-and-set: succeeds only if the stored watermark's `content_hash`
    /// equals `expected_content_hash` (`None` meaning "no watermark exists yet"). On
    /// mismatch returns `Error::ConcurrentIngestion`, the signal the Orchestrator (§4.10)
    /// uses to abandon a run rather than publish over a newer one.
    pub async fn compare_and_set(
        &self,
        source: &str,
        key: &str,
        expected_content_hash: Option<&str>,
        new: Watermark,
    ) -> Result<()> {
        let this = self.clone();
        let source = source.to_string();
        let key = key.to_string();
        let expected = expected_content_hash.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || {
            this.compare_and_set_blocking(&source, &key, expected.as_deref(), new)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }

    fn compare_and_set_blocking(
        &self,
        source: &str,
        key: &str,
        expected_content_hash: Option<&str>,
        new: Watermark,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT content_hash FROM watermarks WHERE source = ?1 AND key = ?2",
                params![source, key],
                |row| row.get(0),
            )
            .optional()?;

        if current.as_deref() != expected_content_hash {
            return Err(Error::ConcurrentIngestion {
                source: source.to_string(),
                key: key.to_string(),
                attempts: 1,
            });
        }

        tx.execute(
            "INSERT INTO watermarks (source, key, content_hash, last_modified, last_run_timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (source, key) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_modified = excluded.last_modified,
                last_run_timestamp = excluded.last_run_timestamp,
                status = excluded.status",
            params![
                source,
                key,
                new.content_hash,
                new.last_modified.map(format_rfc3339),
                format_rfc3339(new.last_run_timestamp),
                status_str(new.status),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn format_rfc3339(ts: time::OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339).unwrap()
}

fn status_str(status: WatermarkStatus) -> &'static str {
    match status {
        WatermarkStatus::Ok => "ok",
        WatermarkStatus::Failed => "failed",
        WatermarkStatus::Running => "running",
    }
}

fn row_to_watermark(
    row: Option<(String, Option<String>, String, String)>,
) -> Result<Option<Watermark>> {
    let Some((content_hash, last_modified, last_run_timestamp, status)) = row else {
        return Ok(None);
    };
    let status = match status.as_str() {
        "ok" => WatermarkStatus::Ok,
        "failed" => WatermarkStatus::Failed,
        "running" => WatermarkStatus::Running,
        other => return Err(Error::Internal(anyhow::anyhow!("corrupt watermark status `{other}`"))),
    };
    Ok(Some(Watermark {
        content_hash,
        last_modified: last_modified.map(|s| parse_rfc3339(&s)).transpose()?,
        last_run_timestamp: parse_rfc3339(&last_run_timestamp)?,
        status,
    }))
}

fn parse_rfc3339(s: &str) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .map_err(|e| Error::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watermark(hash: &str) -> Watermark {
        Watermark {
            content_hash: hash.to_string(),
            last_modified: None,
            last_run_timestamp: time::OffsetDateTime::now_utc(),
            status: WatermarkStatus::Ok,
        }
    }

    fn store() -> WatermarkStore {
        crate::StateStore::open_in_memory().unwrap().watermarks()
    }

    #[tokio::test]
    async fn get_on_unknown_key_is_none() {
        let w = store();
        assert!(w.get("house", "2024").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_set_creates_then_updates_in_sequence() {
        let w = store();
        w.compare_and_set("house", "2024", None, watermark("h1")).await.unwrap();
        let got = w.get("house", "2024").await.unwrap().unwrap();
        assert_eq!(got.content_hash, "h1");

        w.compare_and_set("house", "2024", Some("h1"), watermark("h2")).await.unwrap();
        assert_eq!(w.get("house", "2024").await.unwrap().unwrap().content_hash, "h2");
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectation() {
        let w = store();
        w.compare_and_set("house", "2024", None, watermark("h1")).await.unwrap();
        let err = w.compare_and_set("house", "2024", None, watermark("h2")).await.unwrap_err();
        assert!(matches!(err, Error::ConcurrentIngestion { .. }));
    }

    #[tokio::test]
    async fn put_is_unconditional() {
        let w = store();
        w.put("house", "2024", watermark("h1")).await.unwrap();
        w.put("house", "2024", watermark("h2")).await.unwrap();
        assert_eq!(w.get("house", "2024").await.unwrap().unwrap().content_hash, "h2");
    }
}
