//! Backup Engine Library
//!
//! Concurrent backup execution: enumerates a source tree, decides per file
//! whether to copy it, transfers with retries and atomic replace, and hands
//! selected files to an external encryptor. Runs are controllable (pause,
//! resume, stop) and report their progress as they go.

pub mod api;
pub mod config;
pub mod control;
pub mod crypto;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod model;
pub mod monitor;
pub mod reporter;
pub mod service;
pub mod store;
pub mod transfer;
pub mod utils;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use service::BackupService;
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
