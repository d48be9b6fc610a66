//! Backup job definitions, persisted as a JSON array.

use crate::model::{BackupJob, MAX_JOBS};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug)]
pub struct JobRepository {
    path: PathBuf,
    jobs: Mutex<Vec<BackupJob>>,
}

impl JobRepository {
    /// Load definitions from `path`; a missing file means no jobs yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Vec<BackupJob> {
        let mut jobs = self.jobs.lock().await.clone();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub async fn get(&self, id: u32) -> Option<BackupJob> {
        self.jobs.lock().await.iter().find(|j| j.id == id).cloned()
    }

    pub async fn find_by_name(&self, name: &str) -> Option<BackupJob> {
        self.jobs.lock().await.iter().find(|j| j.name == name).cloned()
    }

    /// Store a new definition and return it with its assigned id (max + 1)
    pub async fn add(&self, mut job: BackupJob) -> Result<BackupJob> {
        let mut jobs = self.jobs.lock().await;
        if jobs.len() >= MAX_JOBS {
            return Err(EngineError::JobLimitReached(MAX_JOBS));
        }
        if jobs.iter().any(|j| j.name == job.name) {
            return Err(EngineError::Config(format!(
                "a backup job named '{}' already exists",
                job.name
            )));
        }

        job.id = jobs.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        jobs.push(job.clone());
        self.save(&jobs).await?;

        info!(job = %job.name, "Added backup job #{}", job.id);
        Ok(job)
    }

    /// Replace the definition fields of an existing job
    pub async fn update(&self, job: &BackupJob) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let existing = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| EngineError::JobNotFound(job.id.to_string()))?;

        existing.name = job.name.clone();
        existing.source = job.source.clone();
        existing.target = job.target.clone();
        existing.backup_type = job.backup_type;
        existing.encryption_enabled = job.encryption_enabled;
        existing.encryption_key = job.encryption_key.clone();

        self.save(&jobs).await
    }

    /// Write back the outcome of a run
    pub async fn record_run(&self, job: &BackupJob, finished_at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let existing = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| EngineError::JobNotFound(job.id.to_string()))?;

        existing.last_run = Some(finished_at);
        existing.status = job.status;
        existing.progress = job.progress;
        existing.current_file = job.current_file.clone();

        self.save(&jobs).await
    }

    pub async fn remove(&self, id: u32) -> Result<BackupJob> {
        let mut jobs = self.jobs.lock().await;
        let index = jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        let removed = jobs.remove(index);
        self.save(&jobs).await?;

        info!(job = %removed.name, "Removed backup job #{}", removed.id);
        Ok(removed)
    }

    async fn save(&self, jobs: &[BackupJob]) -> Result<()> {
        let json = serde_json::to_vec_pretty(jobs)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || super::write_atomic(&path, &json))
            .await
            .map_err(|e| std::io::Error::other(format!("job save task failed: {}", e)))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupType, JobStatus};
    use tempfile::TempDir;

    fn job(name: &str) -> BackupJob {
        BackupJob::new(name, "/src", "/dst", BackupType::Full)
    }

    #[tokio::test]
    async fn test_ids_and_limit() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let repo = JobRepository::open(dir.path().join("jobs.json")).await?;

        for i in 1..=5 {
            let added = repo.add(job(&format!("job{}", i))).await?;
            assert_eq!(added.id, i);
        }

        let err = repo.add(job("job6")).await.unwrap_err();
        assert_eq!(err.to_string(), "Maximum of 5 backup jobs reached");

        repo.remove(2).await?;
        let added = repo.add(job("again")).await?;
        assert_eq!(added.id, 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let repo = JobRepository::open(dir.path().join("jobs.json")).await?;
        repo.add(job("docs")).await?;
        assert!(repo.add(job("docs")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_persistence_and_record_run() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("jobs.json");

        let repo = JobRepository::open(&path).await?;
        let mut docs = repo.add(job("docs")).await?;
        docs.status = JobStatus::Completed;
        docs.progress = 100.0;
        let finished = Utc::now();
        repo.record_run(&docs, finished).await?;

        docs.backup_type = BackupType::Differential;
        repo.update(&docs).await?;

        let reopened = JobRepository::open(&path).await?;
        let loaded = reopened.find_by_name("docs").await.unwrap();
        assert_eq!(loaded.last_run, Some(finished));
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.backup_type, BackupType::Differential);
        assert!(reopened.get(99).await.is_none());
        assert!(matches!(
            reopened.remove(99).await,
            Err(EngineError::JobNotFound(_))
        ));
        Ok(())
    }
}
