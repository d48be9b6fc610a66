//! Progress and state reporting for a run.
//!
//! All counters of a job live behind one async mutex together with the
//! job's live fields. Every mutation republishes the full `BackupState` to
//! the state store and the progress callback while the lock is held, so
//! observers see snapshots in mutation order.

use crate::model::{BackupJob, BackupState, JobStatus, RunStatus};
use crate::store::StateStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::warn;

/// Snapshot handed to the progress callback
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub job_name: String,
    pub job_percent: f64,
    /// Unweighted mean over every job of the current multi-job run
    pub overall_percent: f64,
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: Option<PathBuf>,
    pub status: RunStatus,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressReport) + Send + Sync>;

/// Per-job percentages of a multi-job run
#[derive(Debug)]
pub struct RunAggregate {
    percents: StdMutex<Vec<f64>>,
}

impl RunAggregate {
    pub fn new(job_count: usize) -> Self {
        Self {
            percents: StdMutex::new(vec![0.0; job_count.max(1)]),
        }
    }

    /// Store the percentage of job `slot` and return the new mean
    pub fn update(&self, slot: usize, percent: f64) -> f64 {
        let mut percents = self.percents.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(value) = percents.get_mut(slot) {
            *value = percent;
        }
        percents.iter().sum::<f64>() / percents.len() as f64
    }

    pub fn overall(&self) -> f64 {
        let percents = self.percents.lock().unwrap_or_else(|p| p.into_inner());
        percents.iter().sum::<f64>() / percents.len() as f64
    }
}

impl Default for RunAggregate {
    fn default() -> Self {
        Self::new(1)
    }
}

struct Inner {
    state: BackupState,
    job: BackupJob,
}

pub struct StateReporter {
    inner: Mutex<Inner>,
    store: Arc<dyn StateStore>,
    aggregate: Arc<RunAggregate>,
    slot: usize,
    callback: Option<ProgressCallback>,
}

impl StateReporter {
    pub fn new(
        job: BackupJob,
        store: Arc<dyn StateStore>,
        aggregate: Arc<RunAggregate>,
        slot: usize,
        callback: Option<ProgressCallback>,
    ) -> Self {
        let state = BackupState::new(job.name.clone());
        Self {
            inner: Mutex::new(Inner { state, job }),
            store,
            aggregate,
            slot,
            callback,
        }
    }

    /// Reporter for a single job with no callback
    pub fn standalone(job: BackupJob, store: Arc<dyn StateStore>) -> Self {
        Self::new(job, store, Arc::new(RunAggregate::new(1)), 0, None)
    }

    /// Publish the zeroed state at run start
    pub async fn open(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = BackupState::new(inner.job.name.clone());
        inner.job.status = JobStatus::Running;
        inner.job.progress = 0.0;
        inner.job.current_file = None;
        self.publish(&mut inner);
    }

    /// Totals known after enumeration
    pub async fn begin(&self, total_files: usize, total_size: u64) {
        let mut inner = self.inner.lock().await;
        inner.state.total_files = total_files;
        inner.state.total_size = total_size;
        inner.state.files_processed = 0;
        inner.state.files_remaining = total_files;
        inner.state.size_remaining = total_size;
        self.publish(&mut inner);
    }

    pub async fn file_started(&self, source: &Path, dest: &Path) {
        let mut inner = self.inner.lock().await;
        inner.state.current_source = Some(source.to_path_buf());
        inner.state.current_destination = Some(dest.to_path_buf());
        inner.job.current_file = Some(source.to_path_buf());
        self.publish(&mut inner);
    }

    /// Count one file as processed, whether copied, skipped or failed
    pub async fn file_finished(&self, size: u64) {
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;
        if state.files_remaining > 0 {
            state.files_processed += 1;
            state.files_remaining -= 1;
        }
        state.size_remaining = state.size_remaining.saturating_sub(size);
        self.publish(&mut inner);
    }

    /// Mirror a task phase change into the live job status
    pub async fn set_job_status(&self, status: JobStatus) {
        let mut inner = self.inner.lock().await;
        if inner.job.status.is_terminal() || inner.job.status == status {
            return;
        }
        inner.job.status = status;
        self.publish(&mut inner);
    }

    /// Final state of the run
    pub async fn finish(&self, status: RunStatus) -> BackupState {
        let mut inner = self.inner.lock().await;
        inner.state.status = status;
        inner.state.current_source = None;
        inner.state.current_destination = None;
        inner.job.status = match status {
            RunStatus::Active => JobStatus::Running,
            RunStatus::Completed => JobStatus::Completed,
            RunStatus::Error => JobStatus::Error,
            RunStatus::Cancelled => JobStatus::Cancelled,
        };
        inner.job.current_file = None;
        self.publish(&mut inner);
        inner.state.clone()
    }

    pub async fn snapshot(&self) -> BackupState {
        self.inner.lock().await.state.clone()
    }

    pub async fn job(&self) -> BackupJob {
        self.inner.lock().await.job.clone()
    }

    fn publish(&self, inner: &mut Inner) {
        inner.state.last_action = Utc::now();
        debug_assert!(inner.state.is_consistent());

        let job_percent = inner.state.progress_percentage();
        inner.job.progress = job_percent;

        if let Err(e) = self.store.upsert(&inner.state) {
            warn!(job = %inner.job.name, "Failed to persist state: {}", e);
        }

        let overall_percent = self.aggregate.update(self.slot, job_percent);
        if let Some(callback) = &self.callback {
            callback(ProgressReport {
                job_name: inner.job.name.clone(),
                job_percent,
                overall_percent,
                files_processed: inner.state.files_processed,
                total_files: inner.state.total_files,
                current_file: inner.state.current_source.clone(),
                status: inner.state.status,
            });
        }
    }
}
