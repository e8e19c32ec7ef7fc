use crate::error::Result;
use crate::lock::{StateLock, LOCK_TIMEOUT};
use crate::paths;
use crate::types::{FailureRecord, MonitorState};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lock-guarded read-modify-write access to `cicd-monitor.json`.
///
/// Every mutation acquires the state lock exactly once, re-reads the file,
/// applies the change and writes it back atomically before releasing.
#[derive(Debug, Clone)]
pub struct StateManager {
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl StateManager {
    pub fn new(root: &Path) -> Self {
        Self {
            state_path: paths::cicd_state_path(root),
            lock_path: paths::cicd_lock_path(root),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    /// Current state, or the default document when the file is missing or
    /// unreadable. A missing file is created with the default content.
    pub fn load_state(&self) -> MonitorState {
        if self.state_path.exists() {
            return self.read_state();
        }
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!(path = %self.state_path.display(), error = %e, "could not lock monitor state, using defaults");
                return MonitorState::default();
            }
        };
        // Another writer may have created the file while we waited.
        if self.state_path.exists() {
            return self.read_state();
        }
        let state = MonitorState::default();
        if let Err(e) = self.write_state(&state) {
            tracing::warn!(path = %self.state_path.display(), error = %e, "could not create default monitor state");
        }
        state
    }

    /// Persist `state` under the lock.
    pub fn save_state(&self, state: &MonitorState) -> Result<()> {
        let _lock = self.lock()?;
        self.write_state(state)
    }

    // ---------------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------------

    /// Insert a failure unless its run id is already stored. Returns whether
    /// the record was new.
    pub fn add_failure(&self, record: FailureRecord) -> Result<bool> {
        let run_id = record.run_id;
        let inserted = self.update(|state| state.insert_failure(record))?;
        if inserted {
            tracing::debug!(run_id, "recorded new failure");
        }
        Ok(inserted)
    }

    /// Insert several failures in one critical section. Returns the records
    /// that were not already stored.
    pub fn add_failures(&self, records: Vec<FailureRecord>) -> Result<Vec<FailureRecord>> {
        self.update(|state| insert_all(state, records))
    }

    /// Insert the failures seen by one poll and stamp `lastPoll`, atomically.
    pub fn record_poll(&self, records: Vec<FailureRecord>) -> Result<Vec<FailureRecord>> {
        self.update(|state| {
            let inserted = insert_all(state, records);
            state.last_poll = Some(Utc::now());
            inserted
        })
    }

    /// Flag a failure as processed. Returns `false` (and changes nothing) when
    /// the run id is unknown.
    pub fn mark_processed(&self, run_id: u64) -> Result<bool> {
        self.update(|state| state.mark_processed(run_id))
    }

    pub fn mark_analyzed(&self, run_id: u64) -> Result<bool> {
        self.update(|state| state.mark_analyzed(run_id))
    }

    pub fn mark_fixed(&self, run_id: u64) -> Result<bool> {
        self.update(|state| state.mark_fixed(run_id))
    }

    pub fn update_last_poll(&self) -> Result<()> {
        self.update(|state| state.last_poll = Some(Utc::now()))
    }

    // ---------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------

    pub fn get_unprocessed_failures(&self) -> Vec<FailureRecord> {
        self.load_state().unprocessed()
    }

    pub fn get_failure(&self, run_id: u64) -> Option<FailureRecord> {
        self.load_state().failures.remove(&run_id)
    }

    pub fn has_failure(&self, run_id: u64) -> bool {
        self.load_state().failures.contains_key(&run_id)
    }

    // ---------------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------------

    fn lock(&self) -> Result<StateLock> {
        StateLock::acquire(&self.lock_path, self.lock_timeout)
    }

    /// Lock, read, apply `f`, write, unlock. The lock guard drops on every
    /// return path, including a failed write.
    fn update<T>(&self, f: impl FnOnce(&mut MonitorState) -> T) -> Result<T> {
        let _lock = self.lock()?;
        let mut state = self.read_state();
        let out = f(&mut state);
        self.write_state(&state)?;
        Ok(out)
    }

    fn read_state(&self) -> MonitorState {
        let data = match std::fs::read_to_string(&self.state_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return MonitorState::default(),
            Err(e) => {
                tracing::warn!(path = %self.state_path.display(), error = %e, "failed to read monitor state, using defaults");
                return MonitorState::default();
            }
        };
        match serde_json::from_str::<MonitorState>(&data) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %self.state_path.display(), error = %e, "corrupt monitor state, using defaults");
                MonitorState::default()
            }
        }
    }

    fn write_state(&self, state: &MonitorState) -> Result<()> {
        let data = serde_json::to_string_pretty(state)?;
        crate::io::atomic_write(&self.state_path, data.as_bytes())
    }
}

fn insert_all(state: &mut MonitorState, records: Vec<FailureRecord>) -> Vec<FailureRecord> {
    records
        .into_iter()
        .filter(|r| state.insert_failure(r.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
