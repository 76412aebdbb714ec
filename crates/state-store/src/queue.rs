use std::sync::{Arc, Mutex};
use std::time::Duration;

use lake_types::{Error, QueueMessage, Result};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_messages (
    id              TEXT PRIMARY KEY,
    doc_id          TEXT NOT NULL,
    year            INTEGER NOT NULL,
    filing_type     TEXT NOT NULL,
    attempt_count   INTEGER NOT NULL,
    visible_at      TEXT NOT NULL,
    dead_letter     INTEGER NOT NULL DEFAULT 0,
    dead_reason     TEXT,
    enqueued_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS queue_messages_visible_at
    ON queue_messages (visible_at) WHERE dead_letter = 0;
";

/// A message handed to a worker by [`WorkQueue::receive`], together with the lease id it
/// must present to [`WorkQueue::ack`] or [`WorkQueue::nack`].
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub id: String,
    pub message: QueueMessage,
}

/// At-least-once work queue (§4.2). A message stays invisible to other receivers for its
/// visibility lease; a worker that crashes mid-processing lets the lease expire and the
/// message becomes receivable again, which is how redelivery happens without a dedicated
/// heartbeat channel.
#[derive(Clone)]
pub struct WorkQueue {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl WorkQueue {
    pub async fn enqueue(&self, message: QueueMessage) -> Result<String> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.enqueue_blocking(message))
            .await
            .map_err(|e| Error::Internal(e.into()))?
    }

    fn enqueue_blocking(&self, message: QueueMessage) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queue_messages
                (id, doc_id, year, filing_type, attempt_count, visible_at, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                message.doc_id,
                message.year,
                message.filing_type.code().to_string(),
                message.attempt_count,
                now.format(&time::format_description::well_known::Rfc3339).unwrap(),
            ],
        )?;
        Ok(id)
    }

    /// Leases the oldest visible, non-dead-lettered message for `visibility_timeout`,
    /// incrementing its attempt count. Returns `None` when nothing is currently visible.
    pub async fn receive(&self, visibility_timeout: Duration) -> Result<Option<LeasedMessage>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.receive_blocking(visibility_timeout))
            .await
            .map_err(|e| Error::Internal(e.into()))?
    }

    fn receive_blocking(&self, visibility_timeout: Duration) -> Result<Option<LeasedMessage>> {
        let now = OffsetDateTime::now_utc();
        let now_str = now.format(&time::format_description::well_known::Rfc3339).unwrap();
        let lease_until = now + visibility_timeout;
        let lease_str = lease_until.format(&time::format_description::well_known::Rfc3339).unwrap();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT id, doc_id, year, filing_type, attempt_count FROM queue_messages
                 WHERE dead_letter = 0 AND visible_at <= ?1
                 ORDER BY visible_at ASC LIMIT 1",
                params![now_str],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, doc_id, year, filing_type_code, attempt_count)) = row else {
            return Ok(None);
        };

        let attempt_count = attempt_count + 1;
        tx.execute(
            "UPDATE queue_messages SET visible_at = ?1, attempt_count = ?2 WHERE id = ?3",
            params![lease_str, attempt_count, id],
        )?;
        tx.commit()?;

        let filing_type = lake_types::FilingType::from_code(&filing_type_code)
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt filing_type in queue row {id}")))?;

        Ok(Some(LeasedMessage {
            id,
            message: QueueMessage { doc_id, year, filing_type, attempt_count },
        }))
    }

    pub async fn ack(&self, id: &str) -> Result<()> {
        let this = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = this.conn.lock().unwrap();
            conn.execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }

    /// Makes the message immediately visible again for another receiver.
    pub async fn nack(&self, id: &str) -> Result<()> {
        let this = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let now = OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap();
            let conn = this.conn.lock().unwrap();
            conn.execute(
                "UPDATE queue_messages SET visible_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }

    pub async fn move_to_dead_letter(&self, id: &str, reason: &str) -> Result<()> {
        let this = self.clone();
        let id = id.to_string();
        let reason = reason.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = this.conn.lock().unwrap();
            conn.execute(
                "UPDATE queue_messages SET dead_letter = 1, dead_reason = ?1 WHERE id = ?2",
                params![reason, id],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }

    /// Count of non-dead-lettered messages for `year`, visible or currently leased. Used
    /// by the Orchestrator's Drain step (§4.10): this reaches zero only once every
    /// enqueued message for the year has been acked or dead-lettered.
    pub async fn pending_count_for_year(&self, year: u32) -> Result<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = this.conn.lock().unwrap();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE dead_letter = 0 AND year = ?1",
                params![year],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }

    pub async fn dead_letter_count(&self) -> Result<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = this.conn.lock().unwrap();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE dead_letter = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lake_types::FilingType;

    fn queue() -> WorkQueue {
        crate::StateStore::open_in_memory().unwrap().queue()
    }

    #[tokio::test]
    async fn enqueue_then_receive_then_ack_drains_the_queue() {
        let q = queue();
        q.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();

        let leased = q.receive(Duration::from_secs(30)).await.unwrap().expect("message");
        assert_eq!(leased.message.doc_id, "doc-1");
        assert_eq!(leased.message.attempt_count, 1);

        assert!(q.receive(Duration::from_secs(30)).await.unwrap().is_none());

        q.ack(&leased.id).await.unwrap();
        assert!(q.receive(Duration::from_secs(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_makes_the_message_immediately_receivable_again() {
        let q = queue();
        q.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();
        let leased = q.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        q.nack(&leased.id).await.unwrap();

        let redelivered = q.receive(Duration::from_secs(30)).await.unwrap().expect("redelivered");
        assert_eq!(redelivered.message.attempt_count, 2);
    }

    #[tokio::test]
    async fn dead_lettered_messages_are_not_received() {
        let q = queue();
        q.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();
        let leased = q.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        q.move_to_dead_letter(&leased.id, "extraction failed 5 times").await.unwrap();

        assert!(q.receive(Duration::from_secs(30)).await.unwrap().is_none());
        assert_eq!(q.dead_letter_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pending_count_for_year_excludes_acked_and_dead_lettered() {
        let q = queue();
        q.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();
        q.enqueue(QueueMessage::first_attempt("doc-2", 2024, FilingType::P)).await.unwrap();
        q.enqueue(QueueMessage::first_attempt("doc-3", 2025, FilingType::P)).await.unwrap();
        assert_eq!(q.pending_count_for_year(2024).await.unwrap(), 2);

        let leased = q.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        q.ack(&leased.id).await.unwrap();
        assert_eq!(q.pending_count_for_year(2024).await.unwrap(), 1);

        let leased = q.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        q.move_to_dead_letter(&leased.id, "gave up").await.unwrap();
        assert_eq!(q.pending_count_for_year(2024).await.unwrap(), 0);
        assert_eq!(q.pending_count_for_year(2025).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let q = queue();
        q.enqueue(QueueMessage::first_attempt("doc-1", 2024, FilingType::P)).await.unwrap();
        let _leased = q.receive(Duration::from_millis(1)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let redelivered = q.receive(Duration::from_secs(30)).await.unwrap();
        assert!(redelivered.is_some());
    }
}
