//! Backup job executor - runs one backup job to completion.
//!
//! This module ties together:
//! - Source enumeration and classification
//! - Differential skip decisions
//! - The worker pool with its large-file and priority gates
//! - Transfer with retry, then the optional encryption handoff
//! - State reporting after every file

pub mod differential;
pub mod gates;

use crate::config::Config;
use crate::control::TaskControl;
use crate::crypto::{EncryptionPolicy, EncryptionService};
use crate::fs::{enumerate, Classifier, ExtensionSet, FileClass, FileTimes};
use crate::model::{BackupJob, BackupState, JobStatus, RunStatus};
use crate::reporter::StateReporter;
use crate::store::{AuditLog, LogEntry};
use crate::transfer::{copy_file, ensure_parent, CopyOptions, RetryPolicy, RunSummary};
use crate::utils::errors::{EngineError, Result};
use gates::{LargeFileGate, PriorityGate, PriorityGuard};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tunables of the executor
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub parallel_threshold: usize,
    pub large_file_threshold: u64,
    pub priority: ExtensionSet,
    pub copy: CopyOptions,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.engine.workers.max(1),
            parallel_threshold: config.engine.parallel_threshold,
            large_file_threshold: config.engine.large_file_threshold,
            priority: ExtensionSet::new(&config.priority.extensions),
            copy: CopyOptions {
                buffer_size: config.engine.buffer_size,
                retry: RetryPolicy {
                    attempts: config.engine.retry_count.max(1),
                    base_delay: config.engine.retry_base_delay(),
                },
            },
        }
    }

    /// One sequential worker at or below the threshold, the full pool above it
    pub fn worker_count(&self, file_count: usize) -> usize {
        if file_count > self.parallel_threshold {
            self.workers.max(1)
        } else {
            1
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Encryption service plus the policy deciding which files go through it
#[derive(Clone)]
pub struct Encryptor {
    pub service: EncryptionService,
    pub policy: EncryptionPolicy,
}

/// Result of a run that got as far as enumeration
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state: BackupState,
    pub summary: RunSummary,
}

#[derive(Debug)]
struct WorkItem {
    source: PathBuf,
    dest: PathBuf,
    size: u64,
    class: FileClass,
}

#[derive(Default)]
struct Counters {
    copied: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

/// Per-run state shared by all workers
struct RunContext {
    job: BackupJob,
    queue: Mutex<VecDeque<WorkItem>>,
    last_backup: Option<SystemTime>,
    task: Arc<TaskControl>,
    reporter: Arc<StateReporter>,
    counters: Counters,
    settings: Arc<ExecutorSettings>,
    large_gate: LargeFileGate,
    priority_gate: PriorityGate,
    audit: Arc<dyn AuditLog>,
    encryptor: Option<Encryptor>,
}

enum FileOutcome {
    Copied,
    Skipped,
    Failed,
}

/// Main backup executor. Gates are shared by every run it executes.
#[derive(Clone)]
pub struct BackupExecutor {
    settings: Arc<ExecutorSettings>,
    large_gate: LargeFileGate,
    priority_gate: PriorityGate,
    audit: Arc<dyn AuditLog>,
    encryptor: Option<Encryptor>,
}

impl BackupExecutor {
    pub fn new(settings: ExecutorSettings, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            settings: Arc::new(settings),
            large_gate: LargeFileGate::new(),
            priority_gate: PriorityGate::new(),
            audit,
            encryptor: None,
        }
    }

    pub fn with_encryption(mut self, encryptor: Encryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn large_gate(&self) -> &LargeFileGate {
        &self.large_gate
    }

    /// Execute one backup job under `task`'s control.
    ///
    /// Job-level faults (missing source, uncreatable target, unreadable
    /// tree) are returned as errors after the state has been finalized to
    /// Error. Per-file failures are logged and counted; the run still
    /// completes. A stop request ends the run as Cancelled.
    pub async fn execute(
        &self,
        job: &BackupJob,
        task: Arc<TaskControl>,
        reporter: Arc<StateReporter>,
    ) -> Result<RunOutcome> {
        let start_time = Instant::now();
        info!(job = %job.name, "Starting backup: {} -> {}", job.source.display(), job.target.display());

        reporter.open().await;
        if task.phase() == JobStatus::Ready {
            task.start()?;
        }
        let phase_mirror = spawn_phase_mirror(&task, &reporter);

        let result = self
            .run(job, &task, &reporter, start_time)
            .await;
        phase_mirror.abort();

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(job = %job.name, "Backup failed: {}", e);
                self.audit.record(LogEntry::error(&job.name, e.to_string()));
                reporter.finish(RunStatus::Error).await;
                task.finish(JobStatus::Error);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        job: &BackupJob,
        task: &Arc<TaskControl>,
        reporter: &Arc<StateReporter>,
        start_time: Instant,
    ) -> Result<RunOutcome> {
        if !tokio::fs::metadata(&job.source)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(EngineError::SourceNotFound(job.source.clone()));
        }

        if !tokio::fs::try_exists(&job.target).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&job.target)
                .await
                .map_err(|source| EngineError::TargetCreate {
                    path: job.target.clone(),
                    source,
                })?;
            self.audit.record(LogEntry::dir_created(&job.name, &job.target));
            info!(job = %job.name, "Created target directory {}", job.target.display());
        }

        let source_root = job.source.clone();
        let listing = tokio::task::spawn_blocking(move || enumerate(&source_root))
            .await
            .map_err(|e| std::io::Error::other(format!("enumeration task failed: {}", e)))??;

        let total_files = listing.file_count();
        let total_size = listing.total_size;
        reporter.begin(total_files, total_size).await;

        let last_backup = if job.is_differential() {
            let target_root = job.target.clone();
            tokio::task::spawn_blocking(move || differential::last_backup_time(&target_root))
                .await
                .unwrap_or(None)
        } else {
            None
        };

        let classifier = Classifier::new(
            self.settings.priority.clone(),
            self.settings.large_file_threshold,
        );
        let mut items: Vec<WorkItem> = listing
            .files
            .into_iter()
            .map(|file| {
                let size = file.len();
                WorkItem {
                    class: classifier.classify(&file.path, size),
                    dest: job.target.join(&file.relative_path),
                    source: file.path,
                    size,
                }
            })
            .collect();
        // Priority files first, original order otherwise
        items.sort_by_key(|item| !item.class.priority);

        let workers = self.settings.worker_count(total_files);
        info!(
            job = %job.name,
            "Enumerated {} files ({} bytes), {} worker(s), {}",
            total_files,
            total_size,
            workers,
            if job.is_differential() { "differential" } else { "full" }
        );

        let ctx = Arc::new(RunContext {
            job: job.clone(),
            queue: Mutex::new(items.into()),
            last_backup,
            task: Arc::clone(task),
            reporter: Arc::clone(reporter),
            counters: Counters::default(),
            settings: Arc::clone(&self.settings),
            large_gate: self.large_gate.clone(),
            priority_gate: self.priority_gate.clone(),
            audit: Arc::clone(&self.audit),
            encryptor: self.encryptor.clone(),
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move { ctx.worker_loop(worker_id).await }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(job = %job.name, "Worker task failed: {}", e);
            }
        }

        let cancelled = task.is_stopped();
        let status = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let state = reporter.finish(status).await;
        task.finish(if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        });

        let summary = RunSummary {
            files: state.total_files,
            total_bytes: state.total_size,
            copied: ctx.counters.copied.load(Ordering::SeqCst),
            skipped: ctx.counters.skipped.load(Ordering::SeqCst),
            failed: ctx.counters.failed.load(Ordering::SeqCst),
            elapsed: start_time.elapsed(),
        };

        if cancelled {
            info!(
                job = %job.name,
                "Backup cancelled: {} of {} files processed",
                state.files_processed,
                state.total_files
            );
            self.audit.record(LogEntry::warning(&job.name, "Backup cancelled"));
        } else {
            info!(job = %job.name, "Backup completed: {}", summary);
            self.audit.record(LogEntry::info(
                &job.name,
                format!("Backup completed: {}", summary),
            ));
        }

        Ok(RunOutcome {
            status,
            state,
            summary,
        })
    }
}

/// Copy Running/Paused phase changes into the job's live status
fn spawn_phase_mirror(
    task: &Arc<TaskControl>,
    reporter: &Arc<StateReporter>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = task.subscribe();
    let reporter = Arc::clone(reporter);
    tokio::spawn(async move {
        loop {
            let phase = *rx.borrow_and_update();
            if matches!(phase, JobStatus::Running | JobStatus::Paused) {
                reporter.set_job_status(phase).await;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

impl RunContext {
    fn cancel(&self) -> &CancellationToken {
        self.task.cancel_token()
    }

    /// Pop the next item. Priority items enter the priority gate while the
    /// queue is locked, so no non-priority item can slip past a popped
    /// priority item that has not started yet.
    fn next_item(&self) -> Option<(WorkItem, Option<PriorityGuard>)> {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        let item = queue.pop_front()?;
        let guard = item.class.priority.then(|| self.priority_gate.enter());
        Some((item, guard))
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(job = %self.job.name, "Worker {} started", worker_id);
        loop {
            if self.task.wait_if_paused().await.is_err() {
                break;
            }

            let Some((item, priority_guard)) = self.next_item() else {
                break;
            };

            match self.process(&item).await {
                Ok(FileOutcome::Copied) => {
                    self.counters.copied.fetch_add(1, Ordering::SeqCst);
                }
                Ok(FileOutcome::Skipped) => {
                    self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                }
                Ok(FileOutcome::Failed) => {
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                }
                Err(EngineError::Cancelled) => {
                    debug!(job = %self.job.name, "Worker {} cancelled at {}", worker_id, item.source.display());
                    break;
                }
                Err(e) => {
                    error!(job = %self.job.name, "Unexpected error on {}: {}", item.source.display(), e);
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    self.reporter.file_finished(item.size).await;
                }
            }
            drop(priority_guard);
        }
        debug!(job = %self.job.name, "Worker {} finished", worker_id);
    }

    /// Handle one file. Returns `Err` only for cancellation, in which case
    /// the file is not counted.
    async fn process(&self, item: &WorkItem) -> Result<FileOutcome> {
        if self.cancel().is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if !item.class.priority {
            self.priority_gate.wait_clear(self.cancel()).await?;
        }
        self.reporter.file_started(&item.source, &item.dest).await;

        if self.job.is_differential()
            && differential::should_skip(&item.source, &item.dest, self.last_backup)
        {
            debug!(job = %self.job.name, "Unchanged, skipping {}", item.source.display());
            self.reporter.file_finished(item.size).await;
            return Ok(FileOutcome::Skipped);
        }

        let large_permit = self.admit(item).await?;

        let copied = self.transfer(item).await;
        drop(large_permit);

        let outcome = match copied {
            Ok(elapsed_ms) => self.finish_copy(item, elapsed_ms).await,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!(job = %self.job.name, "Failed to copy {}: {}", item.source.display(), e);
                self.audit.record(LogEntry::transfer_failed(
                    &self.job.name,
                    &item.source,
                    &item.dest,
                    item.size,
                ));
                self.audit.record(LogEntry::error(&self.job.name, e.to_string()));
                FileOutcome::Failed
            }
        };

        self.reporter.file_finished(item.size).await;
        Ok(outcome)
    }

    /// Wait for the gates, then check the pause gate once more. A pause that
    /// arrived while parked at a gate releases the large-file permit and
    /// goes through the gates again after resume.
    async fn admit(&self, item: &WorkItem) -> Result<Option<OwnedSemaphorePermit>> {
        let mut waited_for_pause = false;
        loop {
            if waited_for_pause && !item.class.priority {
                self.priority_gate.wait_clear(self.cancel()).await?;
            }
            let permit = if item.class.large {
                Some(self.large_gate.acquire(self.cancel()).await?)
            } else {
                None
            };

            if self.task.phase() != JobStatus::Paused {
                return Ok(permit);
            }
            drop(permit);
            debug!(job = %self.job.name, "Paused before {}", item.source.display());
            self.task.wait_if_paused().await?;
            waited_for_pause = true;
        }
    }

    async fn transfer(&self, item: &WorkItem) -> Result<u64> {
        if let Some(created) = ensure_parent(&item.dest).await? {
            self.audit.record(LogEntry::dir_created(&self.job.name, &created));
        }
        let outcome = copy_file(&item.source, &item.dest, &self.settings.copy, self.cancel()).await?;
        Ok(outcome.elapsed.as_millis() as u64)
    }

    /// Encrypt when eligible, then write the audit entry
    async fn finish_copy(&self, item: &WorkItem, copy_ms: u64) -> FileOutcome {
        let transfer = LogEntry::transfer(
            &self.job.name,
            &item.source,
            &item.dest,
            item.size,
            std::time::Duration::from_millis(copy_ms),
        );

        let Some(encryptor) = self
            .encryptor
            .as_ref()
            .filter(|e| e.policy.is_eligible(&self.job, &item.dest))
        else {
            self.audit.record(transfer);
            return FileOutcome::Copied;
        };

        match self.encrypt(encryptor, item).await {
            Ok(encryption_ms) => {
                self.audit.record(transfer.with_encryption(encryption_ms));
                FileOutcome::Copied
            }
            Err(e) => {
                warn!(job = %self.job.name, "Encryption failed for {}: {}", item.dest.display(), e);
                // Never leave an unencrypted copy of a file that must be encrypted
                if let Err(remove_err) = tokio::fs::remove_file(&item.dest).await {
                    warn!("Failed to remove unencrypted {}: {}", item.dest.display(), remove_err);
                }
                self.audit.record(
                    LogEntry::transfer_failed(&self.job.name, &item.source, &item.dest, item.size)
                        .with_encryption(-1),
                );
                self.audit.record(LogEntry::error(&self.job.name, e.to_string()));
                FileOutcome::Failed
            }
        }
    }

    async fn encrypt(&self, encryptor: &Encryptor, item: &WorkItem) -> Result<i64> {
        let key = encryptor.policy.key_for(&self.job)?;
        let outcome = encryptor.service.encrypt_file(&item.dest, &key).await?;
        restore_times(&item.source, &item.dest).await;
        Ok(outcome.elapsed_ms())
    }
}

/// Re-apply source timestamps after the encryptor rewrote the file
async fn restore_times(source: &Path, dest: &Path) {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        FileTimes::from_path(&source).and_then(|times| times.apply_to_path(&dest))
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to restore timestamps: {}", e),
        Err(e) => warn!("Timestamp task failed: {}", e),
    }
}
