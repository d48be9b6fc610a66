//! Backup job definitions plus the live fields a run writes into them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Upper bound on stored job definitions.
pub const MAX_JOBS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    Full,
    Differential,
}

/// Lifecycle of a job's current (or last) run.
///
/// Doubles as the phase of the task control state machine:
/// `Ready -> Running -> {Paused <-> Running} -> {Completed | Error | Cancelled | Stopped}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Ready,
    Running,
    Paused,
    Completed,
    Error,
    Cancelled,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled | JobStatus::Stopped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: u32,
    pub name: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,

    // Live fields, written by the engine during a run
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_file: Option<PathBuf>,

    /// Encrypt this job's eligible files even when encryption is off globally
    #[serde(default)]
    pub encryption_enabled: bool,
    /// Overrides the configured default key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl BackupJob {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        backup_type: BackupType,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            source: source.into(),
            target: target.into(),
            backup_type,
            created_at: Utc::now(),
            last_run: None,
            status: JobStatus::Ready,
            progress: 0.0,
            current_file: None,
            encryption_enabled: false,
            encryption_key: None,
        }
    }

    pub fn is_differential(&self) -> bool {
        self.backup_type == BackupType::Differential
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Ready.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_live_fields_default_on_load() {
        let json = r#"{
            "id": 2,
            "name": "docs",
            "source": "/home/docs",
            "target": "/mnt/backup/docs",
            "backup_type": "Differential",
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let job: BackupJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, 2);
        assert!(job.is_differential());
        assert_eq!(job.status, JobStatus::Ready);
        assert!(job.last_run.is_none());
        assert!(!job.encryption_enabled);
    }
}
