//! Registry of in-flight backup tasks, keyed by job name.

use super::TaskControl;
use crate::model::JobStatus;
use crate::utils::errors::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Tracks running tasks and fans control requests out to them
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<String, Arc<TaskControl>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; replaces a finished task with the same name
    pub async fn register(&self, task: Arc<TaskControl>) {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.job_name().to_string(), task);
    }

    /// Remove a task from tracking (called when the run ends)
    pub async fn unregister(&self, job_name: &str) {
        let mut tasks = self.tasks.write().await;
        tasks.remove(job_name);
    }

    pub async fn get(&self, job_name: &str) -> Option<Arc<TaskControl>> {
        self.tasks.read().await.get(job_name).cloned()
    }

    pub async fn pause(&self, job_name: &str) -> Result<()> {
        self.require(job_name).await?.pause()
    }

    pub async fn resume(&self, job_name: &str) -> Result<()> {
        self.require(job_name).await?.resume()
    }

    pub async fn stop(&self, job_name: &str) -> Result<()> {
        self.require(job_name).await?.stop()
    }

    /// Pause every running task. Returns how many changed phase.
    pub async fn pause_all(&self) -> usize {
        self.for_each(|task| task.pause()).await
    }

    /// Resume every paused task. Returns how many changed phase.
    pub async fn resume_all(&self) -> usize {
        self.for_each(|task| task.resume()).await
    }

    /// Stop every non-terminal task. Returns how many changed phase.
    pub async fn stop_all(&self) -> usize {
        self.for_each(|task| task.stop()).await
    }

    /// Phases of all tracked tasks
    pub async fn phases(&self) -> Vec<(String, JobStatus)> {
        let tasks = self.tasks.read().await;
        let mut phases: Vec<_> = tasks
            .values()
            .map(|task| (task.job_name().to_string(), task.phase()))
            .collect();
        phases.sort_by(|a, b| a.0.cmp(&b.0));
        phases
    }

    /// Get count of tracked tasks
    pub async fn running_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    async fn require(&self, job_name: &str) -> Result<Arc<TaskControl>> {
        self.get(job_name)
            .await
            .ok_or_else(|| EngineError::JobNotFound(job_name.to_string()))
    }

    async fn for_each(&self, action: impl Fn(&TaskControl) -> Result<()>) -> usize {
        let tasks = self.tasks.read().await;
        let mut changed = 0;
        for task in tasks.values() {
            match action(task.as_ref()) {
                Ok(()) => changed += 1,
                Err(e) => debug!(job = %task.job_name(), "Skipped: {}", e),
            }
        }
        changed
    }
}
