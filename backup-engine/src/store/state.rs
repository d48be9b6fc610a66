//! Real-time state store, one `BackupState` per job name.
//!
//! Readers get cloned snapshots and never hold the writer's lock across I/O.

use crate::model::BackupState;
use crate::utils::errors::Result;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::warn;

pub trait StateStore: Send + Sync {
    /// Insert or overwrite the state keyed by `state.backup_name`
    fn upsert(&self, state: &BackupState) -> Result<()>;

    fn get(&self, backup_name: &str) -> Option<BackupState>;

    /// Snapshot of every state, ordered by name
    fn all(&self) -> Vec<BackupState>;

    /// Block until every accepted upsert is durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<BTreeMap<String, BackupState>>,
    history: Mutex<Vec<BackupState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state ever upserted, in order
    pub fn history(&self) -> Vec<BackupState> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

impl StateStore for MemoryStateStore {
    fn upsert(&self, state: &BackupState) -> Result<()> {
        if let Ok(mut states) = self.states.lock() {
            states.insert(state.backup_name.clone(), state.clone());
        }
        if let Ok(mut history) = self.history.lock() {
            history.push(state.clone());
        }
        Ok(())
    }

    fn get(&self, backup_name: &str) -> Option<BackupState> {
        self.states.lock().ok()?.get(backup_name).cloned()
    }

    fn all(&self) -> Vec<BackupState> {
        self.states
            .lock()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// JSON file store.
///
/// Upserts update the in-memory map and hand the serialized map to a
/// dedicated writer thread, which rewrites the file atomically. Bursts of
/// upserts collapse into one write of the newest map. `flush` waits for the
/// writer to catch up.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    states: Mutex<BTreeMap<String, BackupState>>,
    writer: Arc<WriterShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct WriterShared {
    pending: Mutex<PendingWrite>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct PendingWrite {
    latest: Option<Vec<u8>>,
    writing: bool,
    closed: bool,
    last_error: Option<String>,
}

impl WriterShared {
    fn lock(&self) -> MutexGuard<'_, PendingWrite> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(&self, path: &Path) {
        let mut pending = self.lock();
        loop {
            while pending.latest.is_none() && !pending.closed {
                pending = self
                    .changed
                    .wait(pending)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            let Some(bytes) = pending.latest.take() else {
                return;
            };
            pending.writing = true;
            drop(pending);

            let result = super::write_atomic(path, &bytes);

            pending = self.lock();
            pending.writing = false;
            pending.last_error = match result {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to write state file {}: {}", path.display(), e);
                    Some(e.to_string())
                }
            };
            self.changed.notify_all();
        }
    }
}

impl JsonStateStore {
    /// Open the store, loading existing states. An unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let states = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring corrupt state file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        let writer = Arc::new(WriterShared::default());
        let handle = {
            let writer = Arc::clone(&writer);
            let path = path.clone();
            std::thread::Builder::new()
                .name("state-writer".to_string())
                .spawn(move || writer.run(&path))?
        };

        Ok(Self {
            path,
            states: Mutex::new(states),
            writer,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn upsert(&self, state: &BackupState) -> Result<()> {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        states.insert(state.backup_name.clone(), state.clone());
        let json = serde_json::to_vec_pretty(&*states)?;

        // Queued while the map is still locked so the newest map always wins
        self.writer.lock().latest = Some(json);
        self.writer.changed.notify_all();
        Ok(())
    }

    fn get(&self, backup_name: &str) -> Option<BackupState> {
        self.states.lock().ok()?.get(backup_name).cloned()
    }

    fn all(&self) -> Vec<BackupState> {
        self.states
            .lock()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    fn flush(&self) -> Result<()> {
        let mut pending = self.writer.lock();
        while pending.latest.is_some() || pending.writing {
            pending = self
                .writer
                .changed
                .wait(pending)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        match &pending.last_error {
            Some(message) => Err(io::Error::other(message.clone()).into()),
            None => Ok(()),
        }
    }
}

impl Drop for JsonStateStore {
    fn drop(&mut self) {
        self.writer.lock().closed = true;
        self.writer.changed.notify_all();
        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("State writer for {} panicked", self.path.display());
            }
        }
    }
}
