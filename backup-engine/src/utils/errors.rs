//! Custom error types for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Failed to create target directory {}: {source}", path.display())]
    TargetCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer of {} failed after {attempts} attempt(s): {source}", path.display())]
    Transfer {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Encryption timed out after {0}s")]
    EncryptionTimeout(u64),

    #[error("Invalid task transition: cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: String },

    #[error("Maximum of {0} backup jobs reached")]
    JobLimitReached(usize),

    #[error("Backup job not found: {0}")]
    JobNotFound(String),
}

impl EngineError {
    /// True for the expected stop outcome, as opposed to a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
