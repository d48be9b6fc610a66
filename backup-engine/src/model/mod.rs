//! Domain types shared by the engine, the stores and the remote monitor.

pub mod job;
pub mod state;

pub use job::{BackupJob, BackupType, JobStatus, MAX_JOBS};
pub use state::{BackupState, RunStatus};
