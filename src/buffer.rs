//! Local durable buffer: the outbox side of cloud sync.
//!
//! Two append-only record collections live in one SQLite file, each row
//! carrying a `synced` flag that only the sync engine flips, and only
//! after a confirmed remote commit. Rows are never deleted.
//!
//! A single connection behind a mutex gives drain reads transactional
//! isolation from concurrent appends.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::model::{EnvironmentSample, RecordKind, SecuritySample};

/// Errors from the local buffer. Producers log and drop; nothing here
/// propagates past the component boundary.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("local buffer error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = core::result::Result<T, BufferError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    temperature REAL,
    humidity REAL,
    synced INTEGER DEFAULT 0
);
CREATE TABLE IF NOT EXISTS security_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    event_type TEXT,
    image_path TEXT,
    mode TEXT,
    synced INTEGER DEFAULT 0
);
";

/// One buffered environment reading, as drained for a sync batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub id: i64,
    pub timestamp: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// One buffered security event, as drained for a sync batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityRow {
    pub id: i64,
    pub timestamp: String,
    pub event_type: String,
    pub image_path: Option<String>,
    pub mode: String,
}

/// SQLite-backed local row buffer.
pub struct SqliteBuffer {
    conn: Mutex<Connection>,
}

impl SqliteBuffer {
    /// Open (creating if needed) the buffer database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory buffer for tests.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert one measurement with `synced = 0`. Returns the local id.
    pub fn append_measurement(&self, sample: &EnvironmentSample) -> Result<i64> {
        let conn = self.conn.lock().expect("buffer lock poisoned");
        conn.execute(
            "INSERT INTO measurements (timestamp, temperature, humidity, synced)
             VALUES (?1, ?2, ?3, 0)",
            rusqlite::params![
                sample.timestamp.to_string(),
                sample.temperature,
                sample.humidity,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert one security event with `synced = 0`. Returns the local id.
    pub fn append_security(&self, sample: &SecuritySample, event_type: &str) -> Result<i64> {
        let conn = self.conn.lock().expect("buffer lock poisoned");
        conn.execute(
            "INSERT INTO security_events (timestamp, event_type, image_path, mode, synced)
             VALUES (?1, ?2, ?3, ?4, 0)",
            rusqlite::params![
                sample.timestamp.to_string(),
                event_type,
                sample.image_path,
                sample.mode.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Oldest-id-first unsynced measurements, bounded to `limit`.
    pub fn unsynced_measurements(&self, limit: usize) -> Result<Vec<MeasurementRow>> {
        let conn = self.conn.lock().expect("buffer lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, temperature, humidity FROM measurements
             WHERE synced = 0 ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(MeasurementRow {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    temperature: row.get(2)?,
                    humidity: row.get(3)?,
                })
            })?
            .collect::<core::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Oldest-id-first unsynced security events, bounded to `limit`.
    pub fn unsynced_security(&self, limit: usize) -> Result<Vec<SecurityRow>> {
        let conn = self.conn.lock().expect("buffer lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_type, image_path, mode FROM security_events
             WHERE synced = 0 ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(SecurityRow {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    event_type: row.get(2)?,
                    image_path: row.get(3)?,
                    mode: row.get(4)?,
                })
            })?
            .collect::<core::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flip `synced` for exactly `ids`, in one local transaction.
    pub fn mark_synced(&self, kind: RecordKind, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("buffer lock poisoned");
        let tx = conn.transaction()?;
        {
            let sql = format!("UPDATE {} SET synced = 1 WHERE id = ?1", kind.table());
            let mut stmt = tx.prepare(&sql)?;
            for id in ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of rows of `kind` still awaiting delivery.
    pub fn unsynced_count(&self, kind: RecordKind) -> Result<i64> {
        let conn = self.conn.lock().expect("buffer lock poisoned");
        let sql = format!("SELECT COUNT(*) FROM {} WHERE synced = 0", kind.table());
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }
}
