//! Configuration management for the backup engine.
//!
//! Loaded once per run from a TOML file. Every section is optional; missing
//! keys fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub priority: PriorityConfig,
    pub encryption: EncryptionConfig,
    pub monitor: MonitorConfig,
    pub log: LogConfig,
    pub state: StateConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker count for large jobs (default: logical CPUs)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs with more files than this run on the worker pool
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Files strictly larger than this go through the large-file gate
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,

    /// Copy buffer size in bytes (default: 1MB)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Attempts per file on transient I/O errors
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// First backoff delay, doubled on each further attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Extensions transferred before everything else (".pdf" or "pdf")
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub extensions: Vec<String>,

    /// Default key, overridden per job
    #[serde(default)]
    pub key: Option<String>,

    /// Path to the external encryptor
    #[serde(default = "default_encryptor")]
    pub executable: PathBuf,

    #[serde(default = "default_encryption_timeout")]
    pub timeout_secs: u64,

    /// How long to wait for another encryptor instance to exit
    #[serde(default = "default_encryption_wait")]
    pub wait_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Business software process names; backups pause while any is running
    #[serde(default)]
    pub processes: Vec<String>,

    #[serde(default = "default_monitor_interval")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory receiving the daily audit files
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Audit file format: json (one object per line) or xml
    #[serde(default)]
    pub format: AuditFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditFormat {
    #[default]
    Json,
    Xml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Real-time state file
    #[serde(default = "default_state_path")]
    pub path: PathBuf,

    /// Backup job definitions
    #[serde(default = "default_jobs_path")]
    pub jobs_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_remote_port")]
    pub port: u16,
}

// Default values
fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_parallel_threshold() -> usize {
    100
}

fn default_large_file_threshold() -> u64 {
    1024 * 1024 // 1MB
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_encryptor() -> PathBuf {
    PathBuf::from("xorcrypt")
}

fn default_encryption_timeout() -> u64 {
    300
}

fn default_encryption_wait() -> u64 {
    30
}

fn default_monitor_interval() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_jobs_path() -> PathBuf {
    PathBuf::from("jobs.json")
}

fn default_remote_port() -> u16 {
    4242
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parallel_threshold: default_parallel_threshold(),
            large_file_threshold: default_large_file_threshold(),
            buffer_size: default_buffer_size(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl EngineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            extensions: Vec::new(),
            key: None,
            executable: default_encryptor(),
            timeout_secs: default_encryption_timeout(),
            wait_timeout_secs: default_encryption_wait(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            processes: Vec::new(),
            interval_ms: default_monitor_interval(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            format: AuditFormat::default(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            jobs_path: default_jobs_path(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_remote_port(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.parallel_threshold, 100);
        assert_eq!(config.engine.large_file_threshold, 1024 * 1024);
        assert_eq!(config.engine.retry_count, 3);
        assert!(config.engine.workers >= 1);
        assert_eq!(config.encryption.timeout_secs, 300);
        assert_eq!(config.encryption.wait_timeout_secs, 30);
        assert_eq!(config.monitor.interval_ms, 1000);
        assert_eq!(config.remote.port, 4242);
        assert!(!config.encryption.enabled);
        assert_eq!(config.log.format, AuditFormat::Json);
    }

    #[test]
    fn test_xml_audit_format() {
        let config: Config = toml::from_str(
            r#"
            [log]
            format = "xml"
            "#,
        )
        .unwrap();
        assert_eq!(config.log.format, AuditFormat::Xml);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [priority]
            extensions = [".pdf", "docx"]

            [encryption]
            enabled = true
            extensions = [".txt"]
            key = "k1"

            [engine]
            workers = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.priority.extensions, vec![".pdf", "docx"]);
        assert!(config.encryption.enabled);
        assert_eq!(config.encryption.key.as_deref(), Some("k1"));
        assert_eq!(config.encryption.timeout_secs, 300);
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.parallel_threshold, 100);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_file() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[monitor]\nprocesses = [\"notepad\"]\ninterval_ms = 250\n")?;

        let config = Config::from_file(&path)?;
        assert_eq!(config.monitor.processes, vec!["notepad"]);
        assert_eq!(config.monitor.interval_ms, 250);
        Ok(())
    }
}
