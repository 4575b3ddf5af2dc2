//! Daily append-only JSONL log.
//!
//! One file per calendar date, named for the date the entry's own
//! timestamp falls on (UTC) — not the wall clock at write time. One lock
//! gates both the handle and rotation, so writers never observe a
//! half-rotated file. Durability is explicit: the orchestrator calls
//! [`DailyJournal::flush`] on its own slower interval rather than after
//! every entry.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use jiff::civil::Date;
use jiff::tz::TimeZone;
use log::info;

use crate::model::LogEntry;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, JournalError>;

struct Active {
    file: File,
    date: Date,
    dirty: bool,
}

/// Append-only daily log rooted at a directory.
pub struct DailyJournal {
    dir: PathBuf,
    active: Mutex<Option<Active>>,
}

impl DailyJournal {
    /// Create a journal rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            active: Mutex::new(None),
        })
    }

    /// The file an entry dated `date` lands in.
    pub fn path_for(&self, date: Date) -> PathBuf {
        self.dir.join(format!("warden-{date}.jsonl"))
    }

    /// Append one entry, rotating first if its date differs from the
    /// active file's. Rotation flushes and fsyncs the old handle before
    /// the new one opens.
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let date = entry.timestamp.to_zoned(TimeZone::UTC).date();
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut active = self.active.lock().expect("journal lock poisoned");
        if active.as_ref().is_none_or(|a| a.date != date) {
            if let Some(old) = active.take() {
                sync_handle(old)?;
            }
            let path = self.path_for(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!("logging to {}", path.display());
            *active = Some(Active {
                file,
                date,
                dirty: false,
            });
        }

        let handle = active.as_mut().expect("journal handle just opened");
        handle.file.write_all(line.as_bytes())?;
        handle.dirty = true;
        Ok(())
    }

    /// Push buffered entries to durable storage (fsync). No-op when clean.
    pub fn flush(&self) -> Result<()> {
        let mut active = self.active.lock().expect("journal lock poisoned");
        if let Some(handle) = active.as_mut()
            && handle.dirty
        {
            handle.file.flush()?;
            handle.file.sync_all()?;
            handle.dirty = false;
        }
        Ok(())
    }

    /// Flush and close the active file. Further appends reopen it.
    pub fn close(&self) -> Result<()> {
        let mut active = self.active.lock().expect("journal lock poisoned");
        if let Some(old) = active.take() {
            sync_handle(old)?;
        }
        Ok(())
    }
}

fn sync_handle(mut active: Active) -> Result<()> {
    active.file.flush()?;
    active.file.sync_all()?;
    Ok(())
}
