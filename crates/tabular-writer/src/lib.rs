use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lake_types::{Error, Result};
use object_store_core::ObjectStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

const MAX_UPSERT_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub rows_in_partition: usize,
    pub attempts: u32,
}

/// Partitioned ndjson writer with etag-guarded optimistic concurrency (C4, §4.4).
///
/// A partition is one object: one newline-delimited-JSON blob per `(source, table,
/// partition)` tuple (for example `silver/house/documents/year=2024/part-0000.ndjson`).
/// `upsert` reads the current partition, merges rows in by key, and writes the merged
/// partition back with `put_if_match`; a writer racing against another worker on the
/// same partition retries from a fresh read rather than overwriting blind.
pub struct TabularWriter {
    store: Arc<dyn ObjectStore>,
}

impl TabularWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Upserts `rows` into `partition_key`, keyed by `row_key`. Every row (existing and
    /// new) must serialize to a JSON object with the same set of field names; a row that
    /// doesn't match the partition's existing schema is rejected with
    /// `Error::SchemaDrift` before anything is written.
    pub async fn upsert<T, F>(&self, partition_key: &str, rows: &[T], row_key: F) -> Result<UpsertOutcome>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: Fn(&T) -> String,
    {
        if rows.is_empty() {
            return Ok(UpsertOutcome { rows_in_partition: self.current_len(partition_key).await?, attempts: 0 });
        }

        let new_schema = schema_of(&rows[0])?;
        for row in rows {
            if schema_of(row)? != new_schema {
                return Err(Error::SchemaDrift {
                    partition: partition_key.to_string(),
                    reason: "rows passed to one upsert call do not share a schema".to_string(),
                });
            }
        }

        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let (mut merged, existing_etag, existing_schema) =
                self.read_partition(partition_key, &row_key).await?;

            if let Some(existing_schema) = existing_schema {
                if existing_schema != new_schema {
                    return Err(Error::SchemaDrift {
                        partition: partition_key.to_string(),
                        reason: format!(
                            "partition has fields {existing_schema:?}, upsert rows have {new_schema:?}"
                        ),
                    });
                }
            }

            for row in rows {
                merged.insert(row_key(row), row.clone());
            }

            let body = serialize_ndjson(merged.values())?;
            match self
                .store
                .put_if_match(partition_key, bytes::Bytes::from(body), Default::default(), existing_etag.as_deref())
                .await
            {
                Ok(_) => return Ok(UpsertOutcome { rows_in_partition: merged.len(), attempts: attempt }),
                Err(Error::ConcurrentUpdate(_)) if attempt < MAX_UPSERT_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }

        Err(Error::ConcurrentUpdate(format!(
            "partition `{partition_key}` stayed contended for {MAX_UPSERT_ATTEMPTS} attempts"
        )))
    }

    async fn current_len(&self, partition_key: &str) -> Result<usize> {
        match self.store.get(partition_key).await {
            Ok((bytes, _)) => Ok(count_lines(&bytes)),
            Err(Error::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn read_partition<T, F>(
        &self,
        partition_key: &str,
        row_key: F,
    ) -> Result<(BTreeMap<String, T>, Option<String>, Option<BTreeSet<String>>)>
    where
        T: DeserializeOwned + Serialize,
        F: Fn(&T) -> String,
    {
        match self.store.get(partition_key).await {
            Ok((bytes, meta)) => {
                let mut rows = BTreeMap::new();
                let mut schema = None;
                for line in std::str::from_utf8(&bytes).map_err(|e| Error::Internal(e.into()))?.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let value: serde_json::Value =
                        serde_json::from_str(line).map_err(|e| Error::Internal(e.into()))?;
                    if schema.is_none() {
                        schema = Some(schema_of_value(&value)?);
                    }
                    let row: T = serde_json::from_value(value).map_err(|e| Error::Internal(e.into()))?;
                    let key = row_key(&row);
                    rows.insert(key, row);
                }
                Ok((rows, Some(meta.etag), schema))
            }
            Err(Error::NotFound(_)) => Ok((BTreeMap::new(), None, None)),
            Err(e) => Err(e),
        }
    }
}

fn schema_of<T: Serialize>(row: &T) -> Result<BTreeSet<String>> {
    let value = serde_json::to_value(row).map_err(|e| Error::Internal(e.into()))?;
    schema_of_value(&value)
}

fn schema_of_value(value: &serde_json::Value) -> Result<BTreeSet<String>> {
    match value.as_object() {
        Some(obj) => Ok(obj.keys().cloned().collect()),
        None => Err(Error::Internal(anyhow::anyhow!("tabular rows must serialize to a JSON object"))),
    }
}

fn serialize_ndjson<'a, T: Serialize + 'a>(rows: impl Iterator<Item = &'a T>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut out, row).map_err(|e| Error::Internal(e.into()))?;
        out.push(b'\n');
    }
    Ok(out)
}

fn count_lines(bytes: &[u8]) -> usize {
    std::str::from_utf8(bytes).map(|s| s.lines().filter(|l| !l.trim().is_empty()).count()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store_core::LocalObjectStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        doc_id: String,
        year: u32,
    }

    fn writer() -> (TabularWriter, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()).unwrap());
        (TabularWriter::new(store), dir)
    }

    #[tokio::test]
    async fn upsert_into_empty_partition_creates_it() {
        let (writer, _dir) = writer();
        let rows = vec![Row { doc_id: "a".into(), year: 2024 }, Row { doc_id: "b".into(), year: 2024 }];
        let outcome = writer.upsert("p.ndjson", &rows, |r| r.doc_id.clone()).await.unwrap();
        assert_eq!(outcome.rows_in_partition, 2);
    }

    #[tokio::test]
    async fn upsert_overwrites_by_key_and_keeps_untouched_rows() {
        let (writer, _dir) = writer();
        let first = vec![Row { doc_id: "a".into(), year: 2023 }, Row { doc_id: "b".into(), year: 2023 }];
        writer.upsert("p.ndjson", &first, |r| r.doc_id.clone()).await.unwrap();

        let second = vec![Row { doc_id: "a".into(), year: 2024 }];
        let outcome = writer.upsert("p.ndjson", &second, |r| r.doc_id.clone()).await.unwrap();
        assert_eq!(outcome.rows_in_partition, 2);

        let (bytes, _) = writer.store.get("p.ndjson").await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("\"year\":2024"));
        assert!(text.contains("\"doc_id\":\"b\""));
    }

    #[tokio::test]
    async fn schema_drift_within_one_call_is_rejected() {
        let (writer, _dir) = writer();
        let rows = vec![serde_json::json!({"doc_id": "a"}), serde_json::json!({"doc_id": "a", "extra": 1})];
        let err = writer.upsert("p.ndjson", &rows, |r| r["doc_id"].as_str().unwrap().to_string()).await.unwrap_err();
        assert!(matches!(err, Error::SchemaDrift { .. }));
    }

    #[tokio::test]
    async fn schema_drift_against_existing_partition_is_rejected() {
        let (writer, _dir) = writer();
        let first = vec![Row { doc_id: "a".into(), year: 2023 }];
        writer.upsert("p.ndjson", &first, |r| r.doc_id.clone()).await.unwrap();

        let second = vec![serde_json::json!({"doc_id": "a", "year": 2024, "extra": true})];
        let err = writer
            .upsert("p.ndjson", &second, |r| r["doc_id"].as_str().unwrap().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaDrift { .. }));
    }
}
