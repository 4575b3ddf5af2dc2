//! Remote row store seam.
//!
//! The sync engine pushes batches through [`RemoteStore`], all-or-nothing
//! per call. The production cloud dialect is out of scope here; the
//! shipped implementation is a SQLite file with the cloud schema (rows
//! tagged with a device identifier, no `synced` column), which is also
//! what the sync tests drive.

use std::path::Path;

use rusqlite::Connection;

use crate::buffer::{MeasurementRow, SecurityRow};

/// Remote push failures. The sync loop treats every variant as transient:
/// the batch is abandoned unmarked and retried on the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote store rejected batch: {0}")]
    Rejected(String),
}

/// A durable remote destination for buffered records.
///
/// Each push commits the whole batch in one remote transaction or fails
/// without writing anything.
pub trait RemoteStore: Send {
    fn push_measurements(
        &mut self,
        device_id: &str,
        rows: &[MeasurementRow],
    ) -> Result<(), RemoteError>;

    fn push_security_events(
        &mut self,
        device_id: &str,
        rows: &[SecurityRow],
    ) -> Result<(), RemoteError>;
}

const REMOTE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    temperature REAL,
    humidity REAL,
    device_id TEXT
);
CREATE TABLE IF NOT EXISTS security_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    event_type TEXT,
    image_path TEXT,
    mode TEXT,
    device_id TEXT
);
";

/// SQLite-backed stand-in for the cloud row store.
pub struct SqliteRemote {
    conn: Connection,
}

impl SqliteRemote {
    pub fn open(path: &Path) -> Result<Self, RemoteError> {
        let conn = Connection::open(path).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        conn.execute_batch(REMOTE_SCHEMA)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, RemoteError> {
        let conn =
            Connection::open_in_memory().map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        conn.execute_batch(REMOTE_SCHEMA)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Rows currently in a remote table.
    #[cfg(test)]
    pub fn row_count(&self, table: &str) -> Result<i64, RemoteError> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        self.conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| RemoteError::Unavailable(e.to_string()))
    }

    /// Device tags of every row in a remote table, in insertion order.
    #[cfg(test)]
    pub fn device_ids(&self, table: &str) -> Result<Vec<String>, RemoteError> {
        let sql = format!("SELECT device_id FROM {table} ORDER BY id");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .and_then(Iterator::collect)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(ids)
    }
}

fn map_err(e: &rusqlite::Error) -> RemoteError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => RemoteError::Rejected(e.to_string()),
        _ => RemoteError::Unavailable(e.to_string()),
    }
}

impl RemoteStore for SqliteRemote {
    fn push_measurements(
        &mut self,
        device_id: &str,
        rows: &[MeasurementRow],
    ) -> Result<(), RemoteError> {
        let tx = self.conn.transaction().map_err(|e| map_err(&e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO measurements (timestamp, temperature, humidity, device_id)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(|e| map_err(&e))?;
            for row in rows {
                stmt.execute(rusqlite::params![
                    row.timestamp,
                    row.temperature,
                    row.humidity,
                    device_id,
                ])
                .map_err(|e| map_err(&e))?;
            }
        }
        tx.commit().map_err(|e| map_err(&e))
    }

    fn push_security_events(
        &mut self,
        device_id: &str,
        rows: &[SecurityRow],
    ) -> Result<(), RemoteError> {
        let tx = self.conn.transaction().map_err(|e| map_err(&e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO security_events (timestamp, event_type, image_path, mode, device_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| map_err(&e))?;
            for row in rows {
                stmt.execute(rusqlite::params![
                    row.timestamp,
                    row.event_type,
                    row.image_path,
                    row.mode,
                    device_id,
                ])
                .map_err(|e| map_err(&e))?;
            }
        }
        tx.commit().map_err(|e| map_err(&e))
    }
}
