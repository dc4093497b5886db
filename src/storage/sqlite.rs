// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed log storage.
//!
//! Records land in a single `logs` table. Every worker opens its own
//! connection; WAL mode plus a busy timeout lets them append concurrently.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use crate::ingest::LogRecord;
use crate::storage::error::Result;
use crate::storage::{LogSink, SinkFactory};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_LOGS_TABLE: &str = "CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id TEXT NOT NULL,
    container_name TEXT NOT NULL,
    json TEXT NOT NULL,
    created_at TEXT NOT NULL
)";

const INSERT_LOG: &str =
    "INSERT INTO logs (container_id, container_name, json, created_at) VALUES (?1, ?2, ?3, ?4)";

/// One connection to the log database
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open (creating if needed) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %journal_mode, "Opened log database");
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute(CREATE_LOGS_TABLE, [])?;

        Ok(Self { conn })
    }

    /// Underlying connection, for queries outside the append path.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl LogSink for SqliteSink {
    fn append_batch(&mut self, records: &[LogRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_LOG)?;
            for record in records {
                let json = serde_json::to_string(&record.payload)?;
                stmt.execute(params![
                    record.target_id,
                    record.target_name,
                    json,
                    record.timestamp.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;

        debug!(records = records.len(), "Stored batch");
        Ok(())
    }
}

/// Opens a fresh connection to one database file per worker
#[derive(Debug, Clone)]
pub struct SqliteSinkFactory {
    path: PathBuf,
}

impl SqliteSinkFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SinkFactory for SqliteSinkFactory {
    fn open(&self) -> Result<Box<dyn LogSink>> {
        Ok(Box::new(SqliteSink::open(&self.path)?))
    }
}
