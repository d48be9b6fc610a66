//! Backup orchestration across jobs.
//!
//! Owns everything shared between runs: the executor and its gates, the
//! task registry, the state store, the encryption worker and the business
//! software monitor. Jobs of one request run one after another; a failing
//! job never prevents the next one from running.

use crate::config::{AuditFormat, Config};
use crate::control::{TaskControl, TaskRegistry};
use crate::crypto::{EncryptionPolicy, EncryptionService, EncryptorSettings};
use crate::executor::{BackupExecutor, Encryptor, ExecutorSettings, RunOutcome};
use crate::model::{BackupJob, BackupState, RunStatus};
use crate::monitor::{ProcessMonitor, ProcessProbe, SystemProbe};
use crate::reporter::{ProgressCallback, RunAggregate, StateReporter};
use crate::store::{
    AuditLog, JobRepository, JsonLinesAuditLog, JsonStateStore, StateStore, XmlAuditLog,
};
use crate::utils::errors::{EngineError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one job within a `run_jobs` call
#[derive(Debug)]
pub struct JobReport {
    /// The job with its live fields and `last_run` as left by the run
    pub job: BackupJob,
    pub outcome: Result<RunOutcome>,
}

impl JobReport {
    pub fn status(&self) -> RunStatus {
        match &self.outcome {
            Ok(outcome) => outcome.status,
            Err(_) => RunStatus::Error,
        }
    }
}

pub struct BackupService {
    executor: BackupExecutor,
    registry: TaskRegistry,
    store: Arc<dyn StateStore>,
    repository: Option<Arc<JobRepository>>,
    monitor: Arc<ProcessMonitor>,
    shutdown: CancellationToken,
}

impl BackupService {
    pub fn new(executor: BackupExecutor, store: Arc<dyn StateStore>) -> Self {
        Self {
            executor,
            registry: TaskRegistry::new(),
            store,
            repository: None,
            monitor: Arc::new(ProcessMonitor::disabled()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Persist `last_run` and live fields to this repository after each job
    pub fn with_repository(mut self, repository: Arc<JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<ProcessMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Wire up the file-backed stores, the encryptor and the process
    /// monitor described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::open(&config.state.path)?);
        let audit: Arc<dyn AuditLog> = match config.log.format {
            AuditFormat::Json => Arc::new(JsonLinesAuditLog::new(&config.log.dir)),
            AuditFormat::Xml => Arc::new(XmlAuditLog::new(&config.log.dir)),
        };
        let repository = Arc::new(JobRepository::open(&config.state.jobs_path).await?);
        let probe: Arc<dyn ProcessProbe> = Arc::new(SystemProbe);

        let encryptor = Encryptor {
            service: EncryptionService::spawn(
                EncryptorSettings::from_config(&config.encryption),
                Arc::clone(&probe),
            ),
            policy: EncryptionPolicy::from_config(&config.encryption),
        };
        let executor = BackupExecutor::new(ExecutorSettings::from_config(config), audit)
            .with_encryption(encryptor);

        let monitor = ProcessMonitor::spawn(
            probe,
            config.monitor.processes.clone(),
            Duration::from_millis(config.monitor.interval_ms.max(50)),
        );

        Ok(Self::new(executor, store)
            .with_repository(repository)
            .with_monitor(Arc::new(monitor)))
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    pub fn repository(&self) -> Option<&Arc<JobRepository>> {
        self.repository.as_ref()
    }

    /// Run `jobs` one after another.
    ///
    /// `progress` receives the per-job percentage plus the unweighted mean
    /// over all jobs of this call. Jobs not yet started when `shutdown` is
    /// requested are left out of the reports.
    pub async fn run_jobs(
        &self,
        jobs: Vec<BackupJob>,
        progress: Option<ProgressCallback>,
    ) -> Vec<JobReport> {
        let aggregate = Arc::new(RunAggregate::new(jobs.len()));
        let mut reports = Vec::with_capacity(jobs.len());

        for (slot, job) in jobs.into_iter().enumerate() {
            if self.shutdown.is_cancelled() {
                info!(job = %job.name, "Shutdown requested, not starting");
                break;
            }

            let reporter = Arc::new(StateReporter::new(
                job.clone(),
                Arc::clone(&self.store),
                Arc::clone(&aggregate),
                slot,
                progress.clone(),
            ));
            reports.push(self.run_one(job, reporter).await);
        }

        reports
    }

    /// Run a single job outside of a multi-job request
    pub async fn run_job(&self, job: BackupJob) -> JobReport {
        let reporter = Arc::new(StateReporter::standalone(job.clone(), Arc::clone(&self.store)));
        self.run_one(job, reporter).await
    }

    async fn run_one(&self, job: BackupJob, reporter: Arc<StateReporter>) -> JobReport {
        let task = Arc::new(TaskControl::new(job.name.clone()));
        if let Err(e) = task.start() {
            return JobReport { job, outcome: Err(e) };
        }
        self.registry.register(Arc::clone(&task)).await;
        // Attached after start: the monitor only acts on Running and Paused tasks
        let listener = self.monitor.attach(Arc::clone(&task));

        let outcome = self
            .executor
            .execute(&job, Arc::clone(&task), Arc::clone(&reporter))
            .await;

        listener.abort();
        self.registry.unregister(&job.name).await;

        let finished_at = Utc::now();
        let mut job = reporter.job().await;
        job.last_run = Some(finished_at);

        if let Some(repository) = &self.repository {
            match repository.record_run(&job, finished_at).await {
                Ok(()) => {}
                Err(EngineError::JobNotFound(_)) => {}
                Err(e) => warn!(job = %job.name, "Failed to record run: {}", e),
            }
        }

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(job = %job.name, "Failed to persist state: {}", e),
            Err(e) => warn!(job = %job.name, "State flush task failed: {}", e),
        }

        match &outcome {
            Ok(run) => info!(job = %job.name, "Finished with status {:?}", run.status),
            Err(e) => error!(job = %job.name, "Finished with error: {}", e),
        }

        JobReport { job, outcome }
    }

    pub async fn pause(&self, job_name: &str) -> Result<()> {
        self.registry.pause(job_name).await
    }

    pub async fn resume(&self, job_name: &str) -> Result<()> {
        self.registry.resume(job_name).await
    }

    pub async fn stop(&self, job_name: &str) -> Result<()> {
        self.registry.stop(job_name).await
    }

    pub async fn pause_all(&self) -> usize {
        self.registry.pause_all().await
    }

    pub async fn resume_all(&self) -> usize {
        self.registry.resume_all().await
    }

    pub async fn stop_all(&self) -> usize {
        self.registry.stop_all().await
    }

    /// Stop running tasks and refuse to start further jobs
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let stopped = self.registry.stop_all().await;
        info!("Shutdown: stopped {} running task(s)", stopped);
    }

    pub fn states(&self) -> Vec<BackupState> {
        self.store.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupType, JobStatus};
    use crate::store::{MemoryAuditLog, MemoryStateStore};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn service(store: Arc<MemoryStateStore>) -> BackupService {
        let executor = BackupExecutor::new(
            ExecutorSettings::default(),
            Arc::new(MemoryAuditLog::new()),
        );
        BackupService::new(executor, store)
    }

    fn job(name: &str, root: &Path) -> BackupJob {
        BackupJob::new(
            name,
            root.join(format!("{}-src", name)),
            root.join(format!("{}-dst", name)),
            BackupType::Full,
        )
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_the_next() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let ok = job("ok", dir.path());
        std::fs::create_dir_all(&ok.source)?;
        std::fs::write(ok.source.join("a.txt"), b"a")?;
        let broken = job("broken", dir.path());

        let store = Arc::new(MemoryStateStore::new());
        let service = service(store.clone());

        let overall = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&overall);
        let callback: ProgressCallback = Arc::new(move |report| {
            sink.lock().unwrap().push(report.overall_percent);
        });

        let reports = service.run_jobs(vec![broken, ok], Some(callback)).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].status(), RunStatus::Error);
        assert_eq!(reports[0].job.status, JobStatus::Error);
        assert_eq!(reports[1].status(), RunStatus::Completed);
        assert!(reports[1].job.last_run.is_some());
        assert_eq!(reports[1].job.progress, 100.0);

        assert_eq!(store.get("broken").unwrap().status, RunStatus::Error);
        assert_eq!(store.get("ok").unwrap().status, RunStatus::Completed);

        // broken stays at 0%, ok reaches 100%
        let last = *overall.lock().unwrap().last().unwrap();
        assert_eq!(last, 50.0);
        assert_eq!(service.registry().running_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_skips_remaining_jobs() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = service(Arc::new(MemoryStateStore::new()));
        service.shutdown().await;

        let reports = service.run_jobs(vec![job("a", dir.path())], None).await;
        assert!(reports.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_controls_unknown_job() {
        let service = service(Arc::new(MemoryStateStore::new()));
        assert!(matches!(
            service.pause("nope").await,
            Err(EngineError::JobNotFound(_))
        ));
        assert_eq!(service.resume_all().await, 0);
    }

    #[tokio::test]
    async fn test_records_run_in_repository() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let repository = Arc::new(JobRepository::open(dir.path().join("jobs.json")).await?);
        let stored = repository.add(job("docs", dir.path())).await?;
        std::fs::create_dir_all(&stored.source)?;

        let service = service(Arc::new(MemoryStateStore::new())).with_repository(repository.clone());
        let report = service.run_job(stored.clone()).await;
        assert_eq!(report.status(), RunStatus::Completed);

        let reloaded = repository.get(stored.id).await.unwrap();
        assert!(reloaded.last_run.is_some());
        assert_eq!(reloaded.status, JobStatus::Completed);
        Ok(())
    }
}
