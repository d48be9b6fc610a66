//! Durable snapshot of a job's most recent run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Active,
    Completed,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupState {
    pub backup_name: String,
    pub last_action: DateTime<Utc>,
    pub status: RunStatus,
    pub total_files: usize,
    pub total_size: u64,
    pub files_processed: usize,
    pub files_remaining: usize,
    pub size_remaining: u64,
    pub current_source: Option<PathBuf>,
    pub current_destination: Option<PathBuf>,
}

impl BackupState {
    /// Zeroed state for a run that has not enumerated its source yet.
    pub fn new(backup_name: impl Into<String>) -> Self {
        Self {
            backup_name: backup_name.into(),
            last_action: Utc::now(),
            status: RunStatus::Active,
            total_files: 0,
            total_size: 0,
            files_processed: 0,
            files_remaining: 0,
            size_remaining: 0,
            current_source: None,
            current_destination: None,
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.files_processed as f64 * 100.0 / self.total_files as f64
        }
    }

    /// `files_processed + files_remaining == total_files`
    pub fn is_consistent(&self) -> bool {
        self.files_processed + self.files_remaining == self.total_files
    }
}
