mod queue;
mod watermark;

use std::sync::{Arc, Mutex};

use lake_types::Result;
use rusqlite::Connection;

pub use queue::{LeasedMessage, WorkQueue};
pub use watermark::WatermarkStore;

/// Work Queue (C2) and Watermark Store (C3) share one SQLite database file, the way
/// `index-scheduler` keeps its queue and versioning state behind a single environment.
/// Sharing a connection means a caller that needs to update a watermark and drain its
/// queue message in the same unit of work can do so inside one transaction.
#[derive(Clone)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

impl StateStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(queue::SCHEMA)?;
        conn.execute_batch(watermark::SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(queue::SCHEMA)?;
        conn.execute_batch(watermark::SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn queue(&self) -> WorkQueue {
        WorkQueue { conn: self.conn.clone() }
    }

    pub fn watermarks(&self) -> WatermarkStore {
        WatermarkStore { conn: self.conn.clone() }
    }
}
