//! Per-run task control: pause, resume and stop.
//!
//! Every run owns one `TaskControl`. The phase lives in a `watch` channel so
//! workers can park on it while paused, and the cancellation token carries
//! stop requests into file-level work.

pub mod registry;

use crate::model::JobStatus;
use crate::utils::errors::{EngineError, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use registry::TaskRegistry;

#[derive(Debug)]
pub struct TaskControl {
    job_name: String,
    phase: watch::Sender<JobStatus>,
    cancel: CancellationToken,
}

impl TaskControl {
    pub fn new(job_name: impl Into<String>) -> Self {
        let (phase, _rx) = watch::channel(JobStatus::Ready);
        Self {
            job_name: job_name.into(),
            phase,
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn phase(&self) -> JobStatus {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.phase.subscribe()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ready -> Running
    pub fn start(&self) -> Result<()> {
        self.transition("start", |p| p == JobStatus::Ready, JobStatus::Running)
    }

    /// Running -> Paused. Workers finish their current file first.
    pub fn pause(&self) -> Result<()> {
        self.transition("pause", |p| p == JobStatus::Running, JobStatus::Paused)?;
        info!(job = %self.job_name, "Task paused");
        Ok(())
    }

    /// Paused -> Running
    pub fn resume(&self) -> Result<()> {
        self.transition("resume", |p| p == JobStatus::Paused, JobStatus::Running)?;
        info!(job = %self.job_name, "Task resumed");
        Ok(())
    }

    /// Any non-terminal phase -> Stopped, and cancel all file-level work.
    pub fn stop(&self) -> Result<()> {
        self.transition("stop", |p| !p.is_terminal(), JobStatus::Stopped)?;
        self.cancel.cancel();
        info!(job = %self.job_name, "Task stopped");
        Ok(())
    }

    /// Record the run outcome. A stopped task stays Stopped.
    pub fn finish(&self, outcome: JobStatus) -> JobStatus {
        self.phase.send_if_modified(|phase| {
            if phase.is_terminal() {
                false
            } else {
                *phase = outcome;
                true
            }
        });
        self.phase()
    }

    /// Park while paused. Returns `Cancelled` once the task is stopped.
    pub async fn wait_if_paused(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut rx = self.phase.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            result = rx.wait_for(|p| *p != JobStatus::Paused) => {
                result.map(|_| ()).map_err(|_| EngineError::Cancelled)
            }
        }
    }

    fn transition(
        &self,
        action: &'static str,
        allowed: impl FnOnce(JobStatus) -> bool,
        next: JobStatus,
    ) -> Result<()> {
        let mut from = JobStatus::Ready;
        let changed = self.phase.send_if_modified(|phase| {
            from = *phase;
            if allowed(*phase) {
                *phase = next;
                true
            } else {
                false
            }
        });

        if changed {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                action,
                phase: from.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_lifecycle() {
        let task = TaskControl::new("docs");
        assert_eq!(task.phase(), JobStatus::Ready);

        assert!(task.pause().is_err());
        task.start().unwrap();
        assert!(task.start().is_err());
        assert!(task.resume().is_err());

        task.pause().unwrap();
        assert_eq!(task.phase(), JobStatus::Paused);
        assert!(task.pause().is_err());

        task.resume().unwrap();
        assert_eq!(task.finish(JobStatus::Completed), JobStatus::Completed);
        assert!(task.stop().is_err());
        assert!(!task.is_stopped());
    }

    #[test]
    fn test_stop_is_terminal() {
        let task = TaskControl::new("docs");
        task.start().unwrap();
        task.pause().unwrap();
        task.stop().unwrap();

        assert!(task.is_stopped());
        assert!(task.resume().is_err());
        assert_eq!(task.finish(JobStatus::Cancelled), JobStatus::Stopped);
    }

    #[test]
    fn test_invalid_transition_reports_phase() {
        let task = TaskControl::new("docs");
        match task.resume() {
            Err(EngineError::InvalidTransition { action, phase }) => {
                assert_eq!(action, "resume");
                assert_eq!(phase, "Ready");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_if_paused_parks_until_resume() {
        let task = Arc::new(TaskControl::new("docs"));
        task.start().unwrap();
        task.wait_if_paused().await.unwrap();

        task.pause().unwrap();
        let waiter = {
            let task = Arc::clone(&task);
            tokio::spawn(async move { task.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        task.resume().unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_paused_waiters() {
        let task = Arc::new(TaskControl::new("docs"));
        task.start().unwrap();
        task.pause().unwrap();

        let waiter = {
            let task = Arc::clone(&task);
            tokio::spawn(async move { task.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.stop().unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(EngineError::Cancelled)));
    }
}
