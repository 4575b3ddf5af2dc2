//! Background cloud synchronization: the drain side of the outbox.
//!
//! A worker drains unsynced records to the remote store in bounded,
//! oldest-first batches, one record kind at a time. Local rows are marked
//! synced only after the whole batch commits remotely, which makes
//! delivery at-least-once: a crash between remote commit and local mark
//! may duplicate a batch, but never loses one.
//!
//! Every remote failure — connection, auth, constraint — is treated as
//! transient. The batch stays unmarked and the same oldest rows are
//! retried next cycle; nothing stops the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::buffer::SqliteBuffer;
use crate::config::SyncConfig;
use crate::model::{EnvironmentSample, RecordKind, SecuritySample};
use crate::remote::RemoteStore;

/// What one sync cycle accomplished, per record kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub measurements: usize,
    pub security_events: usize,
}

/// Drains the local buffer to the remote store, one cycle at a time.
///
/// Separated from the engine's thread so cycles can be driven
/// synchronously in tests.
pub struct SyncWorker {
    buffer: Arc<SqliteBuffer>,
    remote: Option<Box<dyn RemoteStore>>,
    device_id: String,
    batch_size: usize,
    /// Set after a failed push; demotes repeat failure logs to debug.
    remote_down: bool,
}

impl SyncWorker {
    pub fn new(
        buffer: Arc<SqliteBuffer>,
        remote: Option<Box<dyn RemoteStore>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            buffer,
            remote,
            device_id: config.device_id.clone(),
            batch_size: config.batch_size,
            remote_down: false,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Run one full cycle: each record kind independently, one bounded
    /// batch per kind. Never interleaves with another cycle (the caller
    /// owns the worker exclusively).
    pub fn run_cycle(&mut self) -> CycleReport {
        CycleReport {
            measurements: self.sync_measurements(),
            security_events: self.sync_security_events(),
        }
    }

    fn sync_measurements(&mut self) -> usize {
        let Some(remote) = self.remote.as_mut() else {
            return 0;
        };
        let rows = match self.buffer.unsynced_measurements(self.batch_size) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("could not read unsynced measurements: {e}");
                return 0;
            }
        };
        if rows.is_empty() {
            return 0;
        }

        if let Err(e) = remote.push_measurements(&self.device_id, &rows) {
            self.note_push_failure("measurement", &e.to_string());
            return 0;
        }
        self.remote_down = false;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        if let Err(e) = self.buffer.mark_synced(RecordKind::Measurement, &ids) {
            // The remote commit already happened; these rows will be
            // pushed again next cycle. At-least-once, not exactly-once.
            warn!("pushed {} measurements but failed to mark them synced: {e}", ids.len());
            return 0;
        }
        info!("synced {} measurement records to cloud", ids.len());
        ids.len()
    }

    fn sync_security_events(&mut self) -> usize {
        let Some(remote) = self.remote.as_mut() else {
            return 0;
        };
        let rows = match self.buffer.unsynced_security(self.batch_size) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("could not read unsynced security events: {e}");
                return 0;
            }
        };
        if rows.is_empty() {
            return 0;
        }

        if let Err(e) = remote.push_security_events(&self.device_id, &rows) {
            self.note_push_failure("security", &e.to_string());
            return 0;
        }
        self.remote_down = false;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        if let Err(e) = self.buffer.mark_synced(RecordKind::SecurityEvent, &ids) {
            warn!("pushed {} security events but failed to mark them synced: {e}", ids.len());
            return 0;
        }
        info!("synced {} security records to cloud", ids.len());
        ids.len()
    }

    fn note_push_failure(&mut self, kind: &str, message: &str) {
        if self.remote_down {
            debug!("remote still unavailable during {kind} sync: {message}");
        } else {
            warn!("remote push failed during {kind} sync: {message}");
        }
        self.remote_down = true;
    }
}

/// Owns the local buffer's producer API and the background drain thread.
pub struct SyncEngine {
    buffer: Arc<SqliteBuffer>,
    running: Arc<AtomicBool>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
}

impl SyncEngine {
    /// Spawn the background drain task.
    ///
    /// With no remote configured the task sleeps `backoff_secs` between
    /// checks instead of attempting a push.
    pub fn start(
        buffer: Arc<SqliteBuffer>,
        remote: Option<Box<dyn RemoteStore>>,
        config: &SyncConfig,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let mut worker = SyncWorker::new(Arc::clone(&buffer), remote, config);
        let period = Duration::from_secs(config.period_secs);
        let backoff = Duration::from_secs(config.backoff_secs);

        let loop_flag = Arc::clone(&running);
        let spawned = thread::Builder::new()
            .name("sync-engine".to_string())
            .spawn(move || {
                info!("sync engine started");
                while loop_flag.load(Ordering::Acquire) {
                    let sleep_for = if worker.has_remote() {
                        worker.run_cycle();
                        period
                    } else {
                        debug!("no remote destination configured; backing off");
                        backoff
                    };
                    // Sleep in short slices so close() isn't held up for a
                    // whole backoff period.
                    let deadline = Instant::now() + sleep_for;
                    while loop_flag.load(Ordering::Acquire) && Instant::now() < deadline {
                        thread::sleep(Duration::from_millis(50));
                    }
                }
                debug!("sync engine loop exited");
            });

        let worker_thread = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("could not spawn sync thread; cloud sync disabled: {e}");
                None
            }
        };

        Self {
            buffer,
            running,
            worker_thread: Mutex::new(worker_thread),
            join_timeout: Duration::from_secs(2),
        }
    }

    /// Buffer one environment sample. A persistence failure is logged and
    /// the sample dropped; the producer is unaffected.
    pub fn append_measurement(&self, sample: &EnvironmentSample) {
        if let Err(e) = self.buffer.append_measurement(sample) {
            error!("failed to buffer measurement locally: {e}");
        }
    }

    /// Buffer one security event. Same failure policy as measurements.
    pub fn append_security(&self, sample: &SecuritySample, event_type: &str) {
        if let Err(e) = self.buffer.append_security(sample, event_type) {
            error!("failed to buffer security event locally: {e}");
        }
    }

    /// Stop the drain task, waiting a bounded time for it to finish.
    ///
    /// An in-flight cycle is awaited up to the timeout; past that it is
    /// abandoned to process exit with a logged warning.
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        let handle = {
            let mut slot = self.worker_thread.lock().expect("sync lock poisoned");
            slot.take()
        };
        let Some(handle) = handle else { return };

        let deadline = Instant::now() + self.join_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("sync thread panicked during shutdown");
            } else {
                info!("sync engine stopped");
            }
        } else {
            warn!(
                "sync thread did not stop within {:.1}s; abandoning in-flight cycle",
                self.join_timeout.as_secs_f64()
            );
        }
    }
}
